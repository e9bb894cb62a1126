//! # Basalt IDL Compiler Library
//!
//! Basalt is an Interface Definition Language (IDL) for remote services. It lets you describe
//! data types (enums, structs, exceptions, typedefs), constants and services with functions
//! in a language-agnostic way and compile them into client stubs, server skeletons and
//! wire serializers for Python and Rust.
//!
//! ## Core Components
//!
//! This library is composed of several modules that work together to compile Basalt documents:
//!
//! - **Lexer** (`lexer`): Tokenizes IDL source text.
//! - **Parser** (`parser`): Consumes tokens to build a `Document` of unresolved declarations.
//! - **Loader** (`loader`): Reads a root document and, transitively, everything it imports.
//! - **Builder** (`builder`): Resolves names across namespaces and assigns wire ids, producing
//!   the `InterfaceModel` (`model`).
//! - **Validator** (`validator`): Checks the model for cycles, duplicate ids and misused types.
//! - **Generators** (`generators`): Backends turning a validated model into source files.
//! - **Compiler** (`compiler`): Runs the stages above and the backends, in parallel.
//!
//! ## Usage
//!
//! The typical compilation flow is:
//! 1.  **Loading and parsing**: every document reachable through imports becomes a `Document`.
//! 2.  **Building**: `builder::build` produces an `InterfaceModel`.
//! 3.  **Validating**: `validator::validate` rejects models no backend could express.
//! 4.  **Generation**: every `CodeGenerator` (like `PythonGenerator`) produces its files.
//!
//! ## Example
//!
//! ```rust
//! use std::path::Path;
//!
//! use basalt::compiler::Compiler;
//! use basalt::config::{GeneratorOptions, Language};
//! use basalt::generators::create_generator;
//! use basalt::loader::MemorySources;
//!
//! let sources = MemorySources::new().with(
//!     "geometry.idl",
//!     "
//!     struct Point { x: int32; y: int32; }
//!     service Geometry {
//!         distance(a: Point, b: Point) -> float64;
//!     }
//!     ",
//! );
//!
//! let mut compiler = Compiler::new(Box::new(sources))
//!     .with_generator(create_generator(Language::Python, GeneratorOptions::new("gen/py")));
//! let compilation = compiler.compile(Path::new("geometry.idl")).unwrap();
//!
//! for output in &compilation.outputs {
//!     for file in &output.files {
//!         println!("Generated file: {:?}", output.output_dir.join(&file.path));
//!     }
//! }
//! ```

pub mod ast;
pub mod builder;
pub mod compiler;
pub mod config;
pub mod diagnostic;
pub mod error;
pub mod generators;
pub mod lexer;
pub mod loader;
pub mod location;
pub mod model;
pub mod naming;
pub mod parser;
pub mod printer;
pub mod validator;
pub mod wire;

mod color;

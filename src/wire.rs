//! The wire protocol contract every backend's generated code follows.
//!
//! A call is a `CMD_INVOKE` byte, the function's `int32` wire id and then the
//! arguments in declaration order. The reply starts with a [`ReplyCode`]; a
//! packed exception is followed by the exception's `int32` class id and its
//! body. Struct and exception bodies are packed field by field in ascending
//! field id order, enums as `int32`.

use std::fmt;

use crate::model::Field;

/// Sent by both peers when a connection is opened.
pub const MAGIC: u32 = 0x5af3_0cf7;

/// The first byte of every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum Command {
    Ping = 0,
    Invoke = 1,
    Quit = 2,
    Decref = 3,
    Incref = 4,
    Handshake = 5,
}

impl Command {
    pub const ALL: [Command; 6] = [
        Command::Ping,
        Command::Invoke,
        Command::Quit,
        Command::Decref,
        Command::Incref,
        Command::Handshake,
    ];

    /// The constant name used for the command in generated code.
    pub fn constant(&self) -> &'static str {
        match self {
            Command::Ping => "CMD_PING",
            Command::Invoke => "CMD_INVOKE",
            Command::Quit => "CMD_QUIT",
            Command::Decref => "CMD_DECREF",
            Command::Incref => "CMD_INCREF",
            Command::Handshake => "CMD_HANDSHAKE",
        }
    }

    pub fn code(self) -> i8 {
        self as i8
    }
}

/// The first byte of every reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum ReplyCode {
    Success = 0,
    ProtocolError = 1,
    PackedException = 2,
    GenericException = 3,
}

impl ReplyCode {
    pub const ALL: [ReplyCode; 4] = [
        ReplyCode::Success,
        ReplyCode::ProtocolError,
        ReplyCode::PackedException,
        ReplyCode::GenericException,
    ];

    pub fn constant(&self) -> &'static str {
        match self {
            ReplyCode::Success => "REPLY_SUCCESS",
            ReplyCode::ProtocolError => "REPLY_PROTOCOL_ERROR",
            ReplyCode::PackedException => "REPLY_PACKED_EXCEPTION",
            ReplyCode::GenericException => "REPLY_GENERIC_EXCEPTION",
        }
    }

    pub fn code(self) -> i8 {
        self as i8
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.constant())
    }
}

/// The order fields are packed in: ascending wire id, whatever the
/// declaration order.
pub fn packing_order(fields: &[Field]) -> Vec<&Field> {
    let mut ordered: Vec<&Field> = fields.iter().collect();
    ordered.sort_by_key(|field| field.id);
    ordered
}

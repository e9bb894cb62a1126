/// An indentation-aware text buffer that backends stream generated code into.
#[derive(Debug, Clone)]
pub struct CodeWriter {
    buffer: String,
    /// The text written once per indentation level.
    indent_unit: String,
    /// The current indentation level (number of units to prefix the line with).
    current_indent_level: usize,
}

impl CodeWriter {
    pub fn new(indent_spaces: u8) -> Self {
        CodeWriter {
            buffer: String::new(),
            indent_unit: " ".repeat(indent_spaces as usize),
            current_indent_level: 0,
        }
    }

    /// Writes a line with the appropriate indentation. Empty lines carry no
    /// trailing whitespace.
    pub fn write_line(&mut self, content: &str) {
        if !content.is_empty() {
            for _ in 0..self.current_indent_level {
                self.buffer.push_str(&self.indent_unit);
            }
            self.buffer.push_str(content);
        }
        self.buffer.push('\n');
    }

    pub fn blank_line(&mut self) {
        self.buffer.push('\n');
    }

    /// Writes every line of `text` behind `prefix`, as for doc comments.
    pub fn write_prefixed(&mut self, prefix: &str, text: &str) {
        for line in text.lines() {
            if line.is_empty() {
                self.write_line(prefix.trim_end());
            } else {
                self.write_line(&format!("{prefix}{line}"));
            }
        }
    }

    /// Increases the current indentation level.
    pub fn increase_indent(&mut self) {
        self.current_indent_level += 1;
    }

    /// Decreases the current indentation level, preventing it from going below zero.
    pub fn decrease_indent(&mut self) {
        self.current_indent_level = self.current_indent_level.saturating_sub(1);
    }

    /// Writes `header`, then runs `body` one level deeper.
    pub fn block(&mut self, header: &str, body: impl FnOnce(&mut Self)) {
        self.write_line(header);
        self.increase_indent();
        body(self);
        self.decrease_indent();
    }

    pub fn finish(self) -> String {
        self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indentation() {
        let mut w = CodeWriter::new(4);
        w.block("class A:", |w| {
            w.write_line("x = 1");
            w.blank_line();
            w.block("def f(self):", |w| w.write_line("pass"));
        });
        w.decrease_indent();
        w.write_line("y = 2");
        assert_eq!(
            w.finish(),
            "class A:\n    x = 1\n\n    def f(self):\n        pass\ny = 2\n"
        );
    }

    #[test]
    fn test_prefixed_lines() {
        let mut w = CodeWriter::new(2);
        w.increase_indent();
        w.write_prefixed("/// ", "First.\n\nThird.");
        assert_eq!(w.finish(), "  /// First.\n  ///\n  /// Third.\n");
    }
}

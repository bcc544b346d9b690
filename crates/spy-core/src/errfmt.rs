//! Rendering of [`SpyError`](crate::error::SpyError) into the multi-line
//! reports shown to the user:
//!
//! ```text
//! TypeError: mismatched types
//!    --> test.spy:4:9
//!   4 |     x = y + "hello"
//!     |         |_________| expected `i32`, got `str`
//! ```

use crate::error::{Annotation, SpyError};
use crate::source_map::SourceMap;
use crate::span::Span;

pub struct ErrorFormatter<'a> {
    source_map: &'a SourceMap,
    lines: Vec<String>,
}

impl<'a> ErrorFormatter<'a> {
    pub fn new(source_map: &'a SourceMap) -> ErrorFormatter<'a> {
        ErrorFormatter {
            source_map,
            lines: Vec::new(),
        }
    }

    pub fn format(err: &SpyError, source_map: &SourceMap) -> String {
        let mut fmt = ErrorFormatter::new(source_map);
        fmt.emit_message(err.kind.name(), &err.message);
        for ann in &err.annotations {
            fmt.emit_annotation(ann);
        }
        fmt.build()
    }

    fn w(&mut self, s: impl Into<String>) {
        self.lines.push(s.into());
    }

    pub fn build(&self) -> String {
        self.lines.join("\n")
    }

    pub fn emit_message(&mut self, etype: &str, message: &str) {
        self.w(format!("{}: {}", etype, message));
    }

    pub fn emit_annotation(&mut self, ann: &Annotation) {
        let filename = self.source_map.filename(ann.span.file).to_string();
        let line = ann.span.line_start;
        // spans are 0-based on columns, the header is 1-based
        let col = ann.span.col_start + 1;
        let srcline = self
            .source_map
            .line_at(ann.span)
            .unwrap_or_default()
            .trim_end()
            .to_string();
        let underline = make_underline(&srcline, ann.span, &ann.message);
        self.w(format!("   --> {}:{}:{}", filename, line, col));
        self.w(format!("{:>3} | {}", line, srcline));
        self.w(format!("    | {}", underline));
        self.w("");
    }
}

fn make_underline(srcline: &str, span: Span, message: &str) -> String {
    let a = span.col_start as usize;
    let b = if span.col_end < 0 {
        (srcline.len() as i64 + span.col_end as i64 + 1).max(0) as usize
    } else {
        span.col_end as usize
    };
    let n = b.saturating_sub(a);
    let underline = if n < 2 {
        "^".repeat(n.max(1))
    } else {
        format!("|{}|", "_".repeat(n - 2))
    };
    let mut line = " ".repeat(a);
    line.push_str(&underline);
    if !message.is_empty() {
        line.push(' ');
        line.push_str(message);
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, Level, SpyError};
    use pretty_assertions::assert_eq;

    #[test]
    fn caret_for_narrow_span() {
        let line = "x = foo";
        let span = Span::new(1, 1, 1, 4, 5);
        assert_eq!(make_underline(line, span, "here"), "    ^ here");
    }

    #[test]
    fn range_underline() {
        let line = "x = foo + bar";
        let span = Span::new(1, 1, 1, 4, 13);
        assert_eq!(make_underline(line, span, ""), "    |_______|");
    }

    #[test]
    fn whole_line_sentinel() {
        let line = "return 42";
        let span = Span::new(1, 1, 1, 0, -1);
        assert_eq!(make_underline(line, span, ""), "|_______|");
    }

    #[test]
    fn full_report() {
        let mut source_map = SourceMap::new();
        let file = source_map.add_file("test.spy", "def foo() -> i32:\n    return bar\n");
        let mut err = SpyError::new(ErrorKind::Name, "name `bar` is not defined");
        err.add(
            Level::Error,
            "not found in this scope",
            Span::new(file, 2, 2, 11, 14),
        );
        let report = ErrorFormatter::format(&err, &source_map);
        let expected = "\
NameError: name `bar` is not defined
   --> test.spy:2:12
  2 |     return bar
    |            |_| not found in this scope
";
        assert_eq!(report, expected);
    }
}

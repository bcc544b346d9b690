use serde::{Deserialize, Serialize};

/// Index into the [`SourceMap`](crate::source_map::SourceMap). File 0 is the
/// synthetic "<fake>" file used for spans invented by the compiler.
pub type FileId = u32;

/// A location inside the source code, line/column based because diagnostics
/// underline source columns. `col_end == -1` means "to the end of the line".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub file: FileId,
    pub line_start: u32,
    pub line_end: u32,
    pub col_start: u32,
    pub col_end: i32,
}

impl Span {
    pub fn new(file: FileId, line_start: u32, line_end: u32, col_start: u32, col_end: i32) -> Span {
        Span {
            file,
            line_start,
            line_end,
            col_start,
            col_end,
        }
    }

    /// A span pointing at nothing in particular. Used for compiler-synthesized
    /// nodes and in tests.
    pub fn fake() -> Span {
        Span::new(0, 1, 1, 0, 1)
    }

    pub fn is_fake(self) -> bool {
        self.file == 0
    }

    /// A new span covering everything from `start` to `end`.
    pub fn combine(start: Span, end: Span) -> Span {
        debug_assert_eq!(start.file, end.file);
        Span {
            file: start.file,
            line_start: start.line_start,
            line_end: end.line_end,
            col_start: start.col_start,
            col_end: end.col_end,
        }
    }

    /// A zero-width span starting where this one ends. Used to report
    /// "fell off the end of the function" errors.
    pub fn end_span(self) -> Span {
        Span {
            file: self.file,
            line_start: self.line_end,
            line_end: self.line_end,
            col_start: self.col_end.max(0) as u32,
            col_end: self.col_end,
        }
    }
}

impl Default for Span {
    fn default() -> Self {
        Span::fake()
    }
}

impl std::fmt::Display for Span {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{} {}:{}",
            self.line_start, self.col_start, self.line_end, self.col_end
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combine_spans() {
        let a = Span::new(1, 2, 2, 4, 9);
        let b = Span::new(1, 3, 3, 0, 5);
        let c = Span::combine(a, b);
        assert_eq!(c, Span::new(1, 2, 3, 4, 5));
    }

    #[test]
    fn end_span_is_zero_width() {
        let a = Span::new(1, 2, 4, 0, 7);
        let e = a.end_span();
        assert_eq!(e.line_start, 4);
        assert_eq!(e.col_start, 7);
    }
}

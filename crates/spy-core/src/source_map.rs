use crate::span::{FileId, Span};

/// Registered source files, looked up by diagnostics to show the offending
/// lines. File 0 is always the synthetic "<fake>" file.
#[derive(Debug, Clone)]
pub struct SourceMap {
    files: Vec<SourceFile>,
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub text: String,
}

impl SourceMap {
    pub fn new() -> SourceMap {
        SourceMap {
            files: vec![SourceFile {
                name: "<fake>".to_string(),
                text: String::new(),
            }],
        }
    }

    pub fn add_file(&mut self, name: impl Into<String>, text: impl Into<String>) -> FileId {
        let id = self.files.len() as FileId;
        self.files.push(SourceFile {
            name: name.into(),
            text: text.into(),
        });
        id
    }

    pub fn filename(&self, file: FileId) -> &str {
        &self.files[file as usize].name
    }

    /// The 1-based `line` of `file`, without the trailing newline.
    pub fn line(&self, file: FileId, line: u32) -> Option<&str> {
        let text = &self.files.get(file as usize)?.text;
        text.lines().nth(line.saturating_sub(1) as usize)
    }

    pub fn line_at(&self, span: Span) -> Option<&str> {
        self.line(span.file, span.line_start)
    }
}

impl Default for SourceMap {
    fn default() -> Self {
        SourceMap::new()
    }
}

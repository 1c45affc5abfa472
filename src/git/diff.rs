/// File change status in a diff section
#[derive(Debug, Clone, PartialEq)]
pub enum FileStatus {
    Added,
    Modified,
    Deleted,
    Renamed(String), // old path
}

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq)]
pub struct DiffLine {
    pub line_type: LineType,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineType {
    Context,
    Add,
    Delete,
    /// `\ No newline at end of file`
    NoNewline,
}

impl LineType {
    fn prefix(&self) -> &'static str {
        match self {
            LineType::Add => "+",
            LineType::Delete => "-",
            LineType::Context => " ",
            LineType::NoNewline => "\\",
        }
    }
}

/// A diff hunk with its header line kept verbatim
#[derive(Debug, Clone)]
pub struct DiffHunk {
    pub header: String,
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Body lines as patch text (no header), one `\n`-terminated line each
    pub fn body_text(&self) -> String {
        let mut text = String::new();
        for line in &self.lines {
            text.push_str(line.line_type.prefix());
            text.push_str(&line.content);
            text.push('\n');
        }
        text
    }

    pub fn additions(&self) -> usize {
        self.lines.iter().filter(|l| l.line_type == LineType::Add).count()
    }

    pub fn deletions(&self) -> usize {
        self.lines.iter().filter(|l| l.line_type == LineType::Delete).count()
    }
}

/// One `diff --git` section: header block, hunks, and any hunk-less body
#[derive(Debug, Clone)]
pub struct DiffFile {
    pub path: String,
    pub status: FileStatus,
    /// Every line from `diff --git` up to the first `@@`, verbatim
    pub header_lines: Vec<String>,
    pub hunks: Vec<DiffHunk>,
    /// Body lines of sections that carry no `@@` hunk (binary patches)
    pub raw_body: Vec<String>,
}

impl DiffFile {
    pub fn header_text(&self) -> String {
        let mut text = self.header_lines.join("\n");
        text.push('\n');
        text
    }

    pub fn is_rename(&self) -> bool {
        matches!(self.status, FileStatus::Renamed(_))
    }
}

/// Parse unified diff output into structured data
pub fn parse_diff(raw: &str) -> Vec<DiffFile> {
    let mut files: Vec<DiffFile> = Vec::new();
    let mut current_file: Option<DiffFile> = None;
    let mut current_hunk: Option<DiffHunk> = None;

    for line in raw.lines() {
        // New file header: diff --git a/path b/path
        if line.starts_with("diff --git ") {
            flush_hunk(&mut current_file, &mut current_hunk);
            if let Some(file) = current_file.take() {
                files.push(file);
            }

            let path = line.split(" b/").last().unwrap_or("").to_string();
            current_file = Some(DiffFile {
                path,
                status: FileStatus::Modified, // refined by the header lines below
                header_lines: vec![line.to_string()],
                hunks: Vec::new(),
                raw_body: Vec::new(),
            });
            continue;
        }

        let Some(file) = current_file.as_mut() else {
            continue;
        };

        // Hunk header: @@ -old_start,old_count +new_start,new_count @@ context
        if line.starts_with("@@") {
            flush_hunk(&mut current_file, &mut current_hunk);
            current_hunk = parse_hunk_header(line);
            continue;
        }

        if let Some(hunk) = current_hunk.as_mut() {
            if let Some(parsed) = parse_body_line(line) {
                hunk.lines.push(parsed);
            }
            continue;
        }

        // Still inside the header block of this section
        if file.hunks.is_empty() && file.raw_body.is_empty() && is_header_line(line) {
            if line.starts_with("new file") {
                file.status = FileStatus::Added;
            } else if line.starts_with("deleted file") {
                file.status = FileStatus::Deleted;
            } else if let Some(old_path) = line.strip_prefix("rename from ") {
                file.status = FileStatus::Renamed(old_path.to_string());
            } else if let Some(new_path) = line.strip_prefix("rename to ") {
                file.path = new_path.to_string();
            }
            file.header_lines.push(line.to_string());
            continue;
        }

        // Binary patch payloads and anything else git emits without a hunk
        file.raw_body.push(line.to_string());
    }

    // Don't forget the last hunk/file
    flush_hunk(&mut current_file, &mut current_hunk);
    if let Some(file) = current_file {
        files.push(file);
    }

    files
}

fn flush_hunk(file: &mut Option<DiffFile>, hunk: &mut Option<DiffHunk>) {
    if let Some(h) = hunk.take() {
        if let Some(f) = file.as_mut() {
            f.hunks.push(h);
        }
    }
}

fn is_header_line(line: &str) -> bool {
    const PREFIXES: [&str; 13] = [
        "index ",
        "--- ",
        "+++ ",
        "new file mode",
        "deleted file mode",
        "old mode",
        "new mode",
        "similarity index",
        "dissimilarity index",
        "rename from ",
        "rename to ",
        "copy from ",
        "copy to ",
    ];
    PREFIXES.iter().any(|p| line.starts_with(p)) || line.starts_with("Binary files ")
}

fn parse_body_line(line: &str) -> Option<DiffLine> {
    let (line_type, content) = if let Some(rest) = line.strip_prefix('+') {
        (LineType::Add, rest)
    } else if let Some(rest) = line.strip_prefix('-') {
        (LineType::Delete, rest)
    } else if let Some(rest) = line.strip_prefix(' ') {
        (LineType::Context, rest)
    } else if let Some(rest) = line.strip_prefix('\\') {
        (LineType::NoNewline, rest)
    } else if line.is_empty() {
        // Some tools strip the trailing space of empty context lines
        (LineType::Context, "")
    } else {
        return None;
    };
    Some(DiffLine {
        line_type,
        content: content.to_string(),
    })
}

/// Parse a hunk header like "@@ -10,4 +10,15 @@ fn foo()"
fn parse_hunk_header(line: &str) -> Option<DiffHunk> {
    let after_first = line.strip_prefix("@@ ")?;
    let end_idx = after_first.find(" @@")?;
    let range_str = &after_first[..end_idx];

    // Parse "-old_start,old_count +new_start,new_count"
    let parts: Vec<&str> = range_str.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let (old_start, old_count) = parse_range(parts[0].trim_start_matches('-'))?;
    let (new_start, new_count) = parse_range(parts[1].trim_start_matches('+'))?;

    Some(DiffHunk {
        header: line.to_string(),
        old_start,
        old_count,
        new_start,
        new_count,
        lines: Vec::new(),
    })
}

/// Parse "start,count" or just "start" (count defaults to 1)
fn parse_range(s: &str) -> Option<(usize, usize)> {
    if let Some((start, count)) = s.split_once(',') {
        Some((start.parse().ok()?, count.parse().ok()?))
    } else {
        Some((s.parse().ok()?, 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_diff() {
        let raw = r#"diff --git a/src/main.rs b/src/main.rs
index abc123..def456 100644
--- a/src/main.rs
+++ b/src/main.rs
@@ -1,3 +1,4 @@ fn main()
 fn main() {
+    println!("hello");
     let x = 1;
 }
"#;
        let files = parse_diff(raw);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "src/main.rs");
        assert_eq!(files[0].header_lines.len(), 4);
        assert_eq!(files[0].hunks.len(), 1);
        assert_eq!(files[0].hunks[0].header, "@@ -1,3 +1,4 @@ fn main()");
        assert_eq!(files[0].hunks[0].lines.len(), 4);
        assert_eq!(files[0].hunks[0].additions(), 1);
        assert_eq!(files[0].hunks[0].deletions(), 0);
    }

    #[test]
    fn test_parse_new_file() {
        let raw = r#"diff --git a/new.rs b/new.rs
new file mode 100644
index 0000000..abc1234
--- /dev/null
+++ b/new.rs
@@ -0,0 +1,2 @@
+fn hello() {}
+fn world() {}
"#;
        let files = parse_diff(raw);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].status, FileStatus::Added);
        assert_eq!(files[0].hunks[0].additions(), 2);
    }

    #[test]
    fn test_parse_hunk_header() {
        let hunk = parse_hunk_header("@@ -10,4 +10,15 @@ impl Foo");
        assert!(hunk.is_some());
        let h = hunk.unwrap();
        assert_eq!(h.old_start, 10);
        assert_eq!(h.old_count, 4);
        assert_eq!(h.new_start, 10);
        assert_eq!(h.new_count, 15);
    }

    #[test]
    fn hunk_header_without_counts_defaults_to_one() {
        let h = parse_hunk_header("@@ -3 +3 @@").unwrap();
        assert_eq!((h.old_count, h.new_count), (1, 1));
        assert_eq!(h.header, "@@ -3 +3 @@");
    }

    #[test]
    fn deleted_line_that_looks_like_a_header_stays_in_the_hunk() {
        let raw = "diff --git a/q.sql b/q.sql\n\
                   --- a/q.sql\n\
                   +++ b/q.sql\n\
                   @@ -1,2 +1,1 @@\n\
                   --- a comment\n\
                   \x20select 1;\n";
        let files = parse_diff(raw);
        assert_eq!(files[0].header_lines.len(), 3);
        let hunk = &files[0].hunks[0];
        assert_eq!(hunk.lines[0].line_type, LineType::Delete);
        assert_eq!(hunk.lines[0].content, "-- a comment");
    }

    #[test]
    fn rename_only_section_has_no_hunks() {
        let raw = "diff --git a/old.rs b/new.rs\n\
                   similarity index 100%\n\
                   rename from old.rs\n\
                   rename to new.rs\n";
        let files = parse_diff(raw);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "new.rs");
        assert_eq!(files[0].status, FileStatus::Renamed("old.rs".to_string()));
        assert!(files[0].hunks.is_empty());
        assert!(files[0].is_rename());
    }

    #[test]
    fn no_newline_marker_round_trips_through_body_text() {
        let raw = "diff --git a/a.txt b/a.txt\n\
                   --- a/a.txt\n\
                   +++ b/a.txt\n\
                   @@ -1 +1 @@\n\
                   -old\n\
                   \\ No newline at end of file\n\
                   +new\n";
        let files = parse_diff(raw);
        let body = files[0].hunks[0].body_text();
        assert_eq!(body, "-old\n\\ No newline at end of file\n+new\n");
    }

    #[test]
    fn binary_section_keeps_payload_as_raw_body() {
        let raw = "diff --git a/img.png b/img.png\n\
                   index 1111111..2222222 100644\n\
                   GIT binary patch\n\
                   literal 4\n\
                   LcmZ?wWMBXQ00aO5\n";
        let files = parse_diff(raw);
        assert!(files[0].hunks.is_empty());
        assert_eq!(files[0].raw_body.len(), 3);
        assert_eq!(files[0].raw_body[0], "GIT binary patch");
    }

    #[test]
    fn multiple_files_keep_order() {
        let raw = "diff --git a/a.rs b/a.rs\n\
                   --- a/a.rs\n\
                   +++ b/a.rs\n\
                   @@ -1 +1 @@\n\
                   -a\n\
                   +b\n\
                   diff --git a/b.rs b/b.rs\n\
                   deleted file mode 100644\n\
                   --- a/b.rs\n\
                   +++ /dev/null\n\
                   @@ -1 +0,0 @@\n\
                   -gone\n";
        let files = parse_diff(raw);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "a.rs");
        assert_eq!(files[1].path, "b.rs");
        assert_eq!(files[1].status, FileStatus::Deleted);
    }
}

//! Filename and content predicates of a search.

use std::io::Read;

use glob::{MatchOptions, Pattern};

use crate::error::{VfsError, VfsResult};
use crate::vfs::AbstractFile;

use super::options::{SearchOptions, PATTERN_OPTION};

#[derive(Debug, Clone)]
pub struct FileMatcher {
    pattern: Pattern,
    match_options: MatchOptions,
    content: Option<ContentMatcher>,
    max_content_scan_size: u64,
}

impl FileMatcher {
    pub fn new(options: &SearchOptions, max_content_scan_size: u64) -> VfsResult<Self> {
        let pattern = Pattern::new(&options.pattern)
            .map_err(|e| VfsError::invalid_query(PATTERN_OPTION, &options.pattern, e.msg))?;
        let match_options = MatchOptions {
            case_sensitive: options.case_sensitive,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        let content = options
            .content
            .as_deref()
            .map(|needle| ContentMatcher::new(needle, options.content_case_sensitive));

        Ok(Self {
            pattern,
            match_options,
            content,
            max_content_scan_size,
        })
    }

    pub fn matches_name(&self, name: &str) -> bool {
        self.pattern.matches_with(name, self.match_options)
    }

    pub fn has_content_predicate(&self) -> bool {
        self.content.is_some()
    }

    /// True when no content predicate is set or the file contains it. Files
    /// above the scan limit never match.
    pub fn matches_content(&self, file: &dyn AbstractFile, size: u64) -> VfsResult<bool> {
        let Some(content) = &self.content else {
            return Ok(true);
        };
        if size > self.max_content_scan_size {
            tracing::debug!("Skipping content scan of {} ({} bytes)", file.locator(), size);
            return Ok(false);
        }

        let mut data = Vec::with_capacity(size as usize);
        file.open_read()?
            .take(self.max_content_scan_size)
            .read_to_end(&mut data)
            .map_err(|e| VfsError::access(file.locator(), e))?;
        Ok(content.matches(&data))
    }
}

#[derive(Debug, Clone)]
struct ContentMatcher {
    needle: String,
    case_sensitive: bool,
}

impl ContentMatcher {
    fn new(needle: &str, case_sensitive: bool) -> Self {
        let needle = if case_sensitive {
            needle.to_string()
        } else {
            needle.to_lowercase()
        };
        Self {
            needle,
            case_sensitive,
        }
    }

    fn matches(&self, data: &[u8]) -> bool {
        let text = String::from_utf8_lossy(data);
        text.lines().any(|line| {
            if self.case_sensitive {
                line.contains(&self.needle)
            } else {
                line.to_lowercase().contains(&self.needle)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::MemoryFileSystem;

    fn matcher(pattern: &str, case_sensitive: bool, content: Option<&str>) -> FileMatcher {
        let options = SearchOptions {
            pattern: pattern.to_string(),
            case_sensitive,
            content: content.map(str::to_string),
            ..SearchOptions::default()
        };
        FileMatcher::new(&options, 1024).unwrap()
    }

    #[test]
    fn name_case_sensitivity() {
        assert!(matcher("*.txt", false, None).matches_name("README.TXT"));
        assert!(!matcher("*.txt", true, None).matches_name("README.TXT"));
        assert!(matcher("report-??.pdf", false, None).matches_name("report-01.pdf"));
        assert!(matcher("*", false, None).matches_name(".profile"));
    }

    #[test]
    fn bad_pattern_is_invalid_query() {
        let options = SearchOptions {
            pattern: "[unclosed".to_string(),
            ..SearchOptions::default()
        };
        assert!(matches!(
            FileMatcher::new(&options, 1024),
            Err(VfsError::InvalidQuery { .. })
        ));
    }

    #[test]
    fn content_predicate_reads_file() {
        let fs = MemoryFileSystem::new("content");
        fs.write_file("a.txt", "first line\nHello World\n").unwrap();
        fs.write_file("big.txt", vec![b'x'; 2048]).unwrap();
        let a = fs.file("a.txt");
        let big = fs.file("big.txt");

        assert!(matcher("*", false, Some("hello")).matches_content(&a, a.size()).unwrap());
        assert!(!matcher("*", false, Some("absent")).matches_content(&a, a.size()).unwrap());
        assert!(matcher("*", false, None).matches_content(&a, a.size()).unwrap());
        assert!(!matcher("*", false, Some("x")).matches_content(&big, big.size()).unwrap());

        let mut strict = SearchOptions {
            content: Some("hello".to_string()),
            content_case_sensitive: true,
            ..SearchOptions::default()
        };
        assert!(!FileMatcher::new(&strict, 1024).unwrap().matches_content(&a, a.size()).unwrap());
        strict.content = Some("Hello".to_string());
        assert!(FileMatcher::new(&strict, 1024).unwrap().matches_content(&a, a.size()).unwrap());
    }
}

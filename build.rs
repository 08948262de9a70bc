use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories that never hold sources of this crate.
const EXCLUDED_DIRS: [&str; 3] = ["./target", "./examples", "./.git"];

const FORBIDDEN_WORDS: [&str; 14] = [
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

/// The kinds of source hygiene violations this script rejects.
#[derive(Clone, Copy)]
enum Rule {
    UnderscorePrefix,
    ForbiddenWord,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    fn pattern(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => r"\b(_[a-zA-Z0-9_]+)\b",
            Self::ForbiddenWord => {
                r"(//|/\*|///).*(?:FIXED|CORRECTED|FIX|FIXES|NEW|CHANGED|CHANGES|CHANGE|MODIFIED|MODIFIES|MODIFY|UPDATED|UPDATES|UPDATE)"
            }
            Self::StarsInComment => r"(//|/\*).*\*\*",
            Self::AllCapsComment => r"(//|/\*|///).*",
            Self::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]",
        }
    }

    fn headline(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => "underscore-prefixed variables",
            Self::ForbiddenWord | Self::StarsInComment => "forbidden comment patterns",
            Self::AllCapsComment => "comments with all uppercase alphabetic characters",
            Self::AllowDeadCode => "#[allow(dead_code)] attributes",
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Self::UnderscorePrefix => {
                "Underscore-prefixed variable names are not allowed in this project.\n   Either use the variable (removing the underscore) or remove it completely."
            }
            Self::ForbiddenWord => {
                "Changelog-style words in comments are not allowed in this project.\n   Remove them completely rather than commenting them out."
            }
            Self::StarsInComment => {
                "The '**' pattern is not allowed in regular comments (but is allowed in doc comments)."
            }
            Self::AllCapsComment => {
                "Comments where all alphabetic characters are uppercase are not allowed.\n   Strongly consider deleting the comment completely."
            }
            Self::AllowDeadCode => {
                "#[allow(dead_code)] attributes are not allowed in this project.\n   Either use the code (removing the attribute) or remove it completely."
            }
        }
    }

    fn checks_build_script(self) -> bool {
        matches!(self, Self::UnderscorePrefix)
    }

    /// Decides whether a line matched by `pattern()` is a real violation.
    fn is_violation(self, line_text: &str) -> bool {
        let trimmed = line_text.trim_start();
        match self {
            Self::UnderscorePrefix => {
                let is_pure_comment = trimmed.starts_with("//")
                    || (line_text.contains("/*")
                        && !line_text.contains("*/match")
                        && !line_text.contains("*/let"));
                // An odd-indexed piece after splitting on quotes lies inside a string literal.
                let is_in_string = line_text
                    .split('"')
                    .enumerate()
                    .any(|(i, part)| i % 2 == 1 && part.contains('_'));
                !is_pure_comment && !is_in_string
            }
            Self::ForbiddenWord | Self::AllowDeadCode => true,
            Self::StarsInComment => {
                let is_doc_comment = trimmed.starts_with("///");
                !is_doc_comment || FORBIDDEN_WORDS.iter().any(|word| line_text.contains(word))
            }
            Self::AllCapsComment => {
                let comment_text = if let Some(rest) = trimmed.strip_prefix("///") {
                    rest.trim()
                } else if let Some(rest) = trimmed.strip_prefix("//") {
                    rest.trim()
                } else if let Some(idx) = line_text.find("/*") {
                    let rest = &line_text[idx + 2..];
                    match rest.find("*/") {
                        Some(end) => rest[..end].trim(),
                        None => rest.trim(),
                    }
                } else {
                    return false;
                };
                let mut letters = comment_text.chars().filter(|c| c.is_alphabetic()).peekable();
                letters.peek().is_some() && letters.all(char::is_uppercase)
            }
        }
    }
}

// Collects every violating line of one file so the error lists them all.
struct ViolationCollector {
    rule: Rule,
    violations: Vec<String>,
    file_path: PathBuf,
}

impl ViolationCollector {
    fn new(rule: Rule, file_path: &Path) -> Self {
        Self {
            rule,
            violations: Vec::new(),
            file_path: file_path.to_path_buf(),
        }
    }

    fn check_and_get_error_message(&self) -> Option<String> {
        if self.violations.is_empty() {
            return None;
        }

        let file_name = self.file_path.to_str().unwrap_or("?");
        let mut error_msg = format!(
            "\n❌ ERROR: Found {} {} in {}:\n",
            self.violations.len(),
            self.rule.headline(),
            file_name
        );
        for violation in &self.violations {
            error_msg.push_str(&format!("   {violation}\n"));
        }
        error_msg.push_str(&format!("\n⚠️ {}\n", self.rule.advice()));
        Some(error_msg)
    }
}

impl Sink for ViolationCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn rust_sources(include_build_script: bool) -> impl Iterator<Item = PathBuf> {
    WalkDir::new(".")
        .into_iter()
        .filter_entry(|e| !EXCLUDED_DIRS.iter().any(|dir| e.path() == Path::new(dir)))
        .filter_map(|e| e.ok())
        .filter(move |e| include_build_script || e.file_name() != "build.rs")
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
}

fn scan(rule: Rule) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(rule.pattern())?;
    let mut searcher = Searcher::new();

    for path in rust_sources(rule.checks_build_script()) {
        if std::fs::read_to_string(&path).is_err() {
            continue;
        }
        let mut collector = ViolationCollector::new(rule, &path);
        searcher.search_path(&matcher, &path, &mut collector)?;
        if let Some(error_message) = collector.check_and_get_error_message() {
            return Err(error_message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let rules = [
        Rule::UnderscorePrefix,
        Rule::ForbiddenWord,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ];
    for rule in rules {
        if let Err(e) = scan(rule) {
            // Printed rather than returned so cargo shows the full listing.
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

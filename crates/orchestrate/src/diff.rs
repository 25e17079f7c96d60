//! Line diff between an attached policy document and a freshly rendered one.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "op", content = "line", rename_all = "snake_case")]
pub enum DiffLine {
    Same(String),
    Added(String),
    Removed(String),
}

/// The result of diffing two pretty-printed policy documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDiff {
    pub label: String,
    pub lines: Vec<DiffLine>,
}

impl PolicyDiff {
    /// Diff `before` against `after` line by line (longest common subsequence).
    pub fn compute(label: &str, before: &str, after: &str) -> Self {
        let a: Vec<&str> = before.lines().collect();
        let b: Vec<&str> = after.lines().collect();

        // lcs[i][j] = length of the LCS of a[i..] and b[j..]
        let mut lcs = vec![vec![0usize; b.len() + 1]; a.len() + 1];
        for i in (0..a.len()).rev() {
            for j in (0..b.len()).rev() {
                lcs[i][j] = if a[i] == b[j] {
                    lcs[i + 1][j + 1] + 1
                } else {
                    lcs[i + 1][j].max(lcs[i][j + 1])
                };
            }
        }

        let mut lines = Vec::with_capacity(a.len().max(b.len()));
        let (mut i, mut j) = (0, 0);
        while i < a.len() && j < b.len() {
            if a[i] == b[j] {
                lines.push(DiffLine::Same(a[i].to_string()));
                i += 1;
                j += 1;
            } else if lcs[i + 1][j] >= lcs[i][j + 1] {
                lines.push(DiffLine::Removed(a[i].to_string()));
                i += 1;
            } else {
                lines.push(DiffLine::Added(b[j].to_string()));
                j += 1;
            }
        }
        lines.extend(a[i..].iter().map(|l| DiffLine::Removed(l.to_string())));
        lines.extend(b[j..].iter().map(|l| DiffLine::Added(l.to_string())));

        PolicyDiff {
            label: label.to_string(),
            lines,
        }
    }

    /// Returns true if there are no differences.
    pub fn is_empty(&self) -> bool {
        self.lines.iter().all(|l| matches!(l, DiffLine::Same(_)))
    }

    pub fn added(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Added(_)))
            .count()
    }

    pub fn removed(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Removed(_)))
            .count()
    }

    /// Format the diff as unified-style text: `--- current`, `+++ rendered`,
    /// then every line prefixed with ` `, `-` or `+`.
    pub fn to_text(&self) -> String {
        let mut out = vec![
            format!("--- {} (current)", self.label),
            format!("+++ {} (rendered)", self.label),
        ];
        for line in &self.lines {
            out.push(match line {
                DiffLine::Same(l) => format!(" {}", l),
                DiffLine::Removed(l) => format!("-{}", l),
                DiffLine::Added(l) => format!("+{}", l),
            });
        }
        out.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_documents_have_empty_diff() {
        let doc = "{\n  \"a\": 1\n}";
        let diff = PolicyDiff::compute("p", doc, doc);
        assert!(diff.is_empty());
        assert_eq!(diff.added(), 0);
    }

    #[test]
    fn changed_line_shows_as_removal_and_addition() {
        let before = "{\n  \"Action\": \"s3:GetObject\",\n  \"Effect\": \"Allow\"\n}";
        let after = "{\n  \"Action\": \"s3:*\",\n  \"Effect\": \"Allow\"\n}";
        let diff = PolicyDiff::compute("acme-site-deploy-dev-permissions", before, after);
        assert!(!diff.is_empty());
        assert_eq!((diff.removed(), diff.added()), (1, 1));
        let text = diff.to_text();
        assert!(text.starts_with("--- acme-site-deploy-dev-permissions (current)\n+++"));
        assert!(text.contains("\n-  \"Action\": \"s3:GetObject\","));
        assert!(text.contains("\n+  \"Action\": \"s3:*\","));
        assert!(text.contains("\n   \"Effect\": \"Allow\""));
    }

    #[test]
    fn missing_document_is_all_additions() {
        let diff = PolicyDiff::compute("p", "", "{\n}");
        assert_eq!(diff.added(), 2);
        assert_eq!(diff.removed(), 0);
    }
}

//! Include/exclude routing by logger namespace.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("include and exclude must not intersect, but found {0} in both lists")]
    Intersect(String),

    #[error(
        "when both include and exclude are populated, each element must be a \
         superspace or subspace of one in the other list; check '{0}' in include"
    )]
    Unrelated(String),
}

/// Namespace allow/deny lists of a custom log.
///
/// `exclude` also understands `*` (every named logger) and `.` (only the
/// unnamed core logger).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl NamespaceFilter {
    /// Build a filter. When both lists are populated they must describe
    /// nested overrides: no shared entries, and every include entry must be
    /// an ancestor or descendant of some exclude entry.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self, FilterError> {
        if !include.is_empty() && !exclude.is_empty() {
            if let Some(both) = include.iter().find(|allow| exclude.contains(allow)) {
                return Err(FilterError::Intersect(both.clone()));
            }

            for allow in &include {
                let related = exclude.iter().any(|deny| {
                    let (allow, deny) = (format!("{}.", allow), format!("{}.", deny));
                    allow.starts_with(&deny) || deny.starts_with(&allow)
                });
                if !related {
                    return Err(FilterError::Unrelated(allow.clone()));
                }
            }
        }

        Ok(Self { include, exclude })
    }

    /// True when the filter accepts everything.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Should an entry from logger `name` be written?
    pub fn allows(&self, name: &str) -> bool {
        self.decide(name, false)
    }

    /// Could a logger for module `id` produce entries this filter accepts?
    /// Its entries may carry the id or any name beneath it, so an include
    /// entry below the id also matches. Used to skip logs up front.
    pub fn allows_module(&self, id: &str) -> bool {
        self.decide(id, true)
    }

    fn decide(&self, name: &str, module: bool) -> bool {
        if self.is_empty() {
            return true;
        }

        let name = match name {
            "" if !module => ".".to_string(),
            "" | "*" | "." => name.to_string(),
            _ => format!("{}.", name),
        };

        let mut longest_accept = 0;
        for namespace in &self.include {
            let namespace_dot = format!("{}.", namespace);
            let matches = if module {
                namespace_dot.starts_with(&name) || name.starts_with(&namespace_dot)
            } else {
                name.starts_with(&namespace_dot)
            };
            if matches {
                longest_accept = longest_accept.max(namespace.len());
            }
        }
        if !self.include.is_empty() && longest_accept == 0 {
            return false;
        }

        let mut longest_reject = 0;
        for namespace in &self.exclude {
            if (namespace == "*" && name != ".") || (namespace == "." && name == ".") {
                return false;
            }
            if name.starts_with(&format!("{}.", namespace)) {
                longest_reject = longest_reject.max(namespace.len());
            }
        }

        longest_accept > longest_reject || (self.include.is_empty() && longest_reject == 0)
    }
}

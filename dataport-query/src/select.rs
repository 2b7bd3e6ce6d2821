//! Field projection and nested include selection

/// Tree of relation paths; shared prefixes collapse into one branch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IncludeTree {
    children: Vec<(String, IncludeTree)>,
}

impl IncludeTree {
    /// Build a tree from dot-delimited paths such as `author.profile`
    pub fn from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut tree = IncludeTree::default();
        for path in paths {
            tree.insert(path.as_ref());
        }
        tree
    }

    pub fn insert(&mut self, path: &str) {
        let mut current = self;
        for part in path.split('.').map(str::trim).filter(|p| !p.is_empty()) {
            let idx = match current.children.iter().position(|(name, _)| name == part) {
                Some(idx) => idx,
                None => {
                    current
                        .children
                        .push((part.to_string(), IncludeTree::default()));
                    current.children.len() - 1
                }
            };
            current = &mut current.children[idx].1;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Render depth-first as `a(b(*)),c(*)`
    pub fn render(&self) -> String {
        self.children
            .iter()
            .map(|(name, subtree)| {
                if subtree.is_empty() {
                    format!("{name}(*)")
                } else {
                    format!("{name}({})", subtree.render())
                }
            })
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Build the select expression: the projected fields (or `*`) followed by
/// any nested includes.
pub fn select_clause(fields: &[String], include: &[String]) -> String {
    let base = if fields.is_empty() {
        "*".to_string()
    } else {
        fields.join(",")
    };
    let tree = IncludeTree::from_paths(include);
    if tree.is_empty() {
        base
    } else {
        format!("{base},{}", tree.render())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_prefixes_merge() {
        let tree = IncludeTree::from_paths(&["author.profile", "author.posts", "tags"]);
        assert_eq!(tree.render(), "author(profile(*),posts(*)),tags(*)");
    }

    #[test]
    fn test_duplicate_paths_do_not_duplicate_branches() {
        let tree = IncludeTree::from_paths(&["author", "author.profile", "author"]);
        assert_eq!(tree.render(), "author(profile(*))");
    }

    #[test]
    fn test_select_clause() {
        assert_eq!(select_clause(&[], &[]), "*");
        assert_eq!(
            select_clause(&["id".to_string(), "title".to_string()], &[]),
            "id,title"
        );
        assert_eq!(
            select_clause(&[], &["comments.user".to_string()]),
            "*,comments(user(*))"
        );
    }
}

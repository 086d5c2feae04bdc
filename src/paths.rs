use std::path::PathBuf;

use serde::Deserialize;

const REPO_OWNER: &str = "$REPO_OWNER";
const REPO_NAME: &str = "$REPO_NAME";
const BRANCH: &str = "$BRANCH";

/// Directory template for working copies, e.g. `/srv/$REPO_OWNER/$REPO_NAME/$BRANCH`.
///
/// Distinct branches only get distinct directories if the operator puts all
/// three placeholders into the template; nothing here checks that.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct PathTemplate(String);

impl PathTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self(template.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Substitutes the placeholders in a single pass. Substituted values are
    /// never scanned for placeholders again.
    pub fn resolve(&self, owner: &str, repo: &str, branch: &str) -> PathBuf {
        let replacements = [(REPO_OWNER, owner), (REPO_NAME, repo), (BRANCH, branch)];

        let mut resolved = String::with_capacity(self.0.len() + owner.len() + repo.len());
        let mut rest = self.0.as_str();
        while let Some(idx) = rest.find('$') {
            resolved.push_str(&rest[..idx]);
            rest = &rest[idx..];
            match replacements
                .iter()
                .find(|(token, _)| rest.starts_with(token))
            {
                Some((token, value)) => {
                    resolved.push_str(value);
                    rest = &rest[token.len()..];
                }
                None => {
                    resolved.push('$');
                    rest = &rest[1..];
                }
            }
        }
        resolved.push_str(rest);

        PathBuf::from(resolved)
    }
}

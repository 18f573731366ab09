//! Exclusion-rule evaluation, checked both at watcher emit time and at
//! manifest build time so the two can never disagree about what's in
//! scope. Deny-by-default: a path is excluded unless every applicable rule
//! lets it through.
//!
//! Glob compilation follows the same deterministic-rule-matching shape as
//! the policy engines elsewhere in this codebase — patterns are compiled
//! once and evaluated, not re-parsed per path.

use regex::Regex;

/// Toggles and patterns the user has configured, mirroring the durable
/// client config's sync-toggle fields.
#[derive(Debug, Clone)]
pub struct ExclusionConfig {
    /// Vault-relative directory the editor keeps its configuration in
    /// (e.g. `.obsidian`).
    pub config_dir: String,
    /// This plugin's own subdirectory within `config_dir`; always excluded.
    pub own_plugin_dir: String,
    /// Sync workspace layout files (`workspace.json` et al.) under `config_dir`.
    pub sync_workspace: bool,
    /// Sync `<config_dir>/plugins/`.
    pub sync_plugins: bool,
    /// Sync the rest of `config_dir` (everything except `plugins/`).
    pub sync_settings: bool,
    /// Sync every file type, not just `.md`, outside `config_dir`.
    pub sync_all_file_types: bool,
    /// User-supplied glob patterns (`*` within a segment, `**` across segments)
    /// whose matches are excluded regardless of the toggles above.
    pub exclude_globs: Vec<String>,
}

/// Compiled exclusion rules ready for repeated per-path evaluation.
#[derive(Clone)]
pub struct ExclusionRules {
    config: ExclusionConfig,
    compiled_globs: Vec<Regex>,
}

impl ExclusionRules {
    /// Compile `config`'s glob patterns once.
    #[must_use]
    pub fn new(config: ExclusionConfig) -> Self {
        let compiled_globs = config.exclude_globs.iter().map(|g| compile_glob(g)).collect();
        Self { config, compiled_globs }
    }

    fn under_config_dir(&self, path: &str) -> bool {
        path == self.config.config_dir || path.starts_with(&format!("{}/", self.config.config_dir))
    }

    fn relative_to_config(&self, path: &str) -> Option<&str> {
        path.strip_prefix(&format!("{}/", self.config.config_dir))
    }

    /// Whether `path` is in scope for syncing: deny-by-default, so any
    /// matching exclusion rule wins over an otherwise-included path.
    #[must_use]
    pub fn is_excluded(&self, path: &str) -> bool {
        if self.compiled_globs.iter().any(|re| re.is_match(path)) {
            return true;
        }

        if self.under_config_dir(path) {
            let rel = self.relative_to_config(path).unwrap_or("");
            if rel.starts_with(&format!("{}/", self.config.own_plugin_dir))
                || rel == self.config.own_plugin_dir
            {
                return true;
            }
            if rel.starts_with("plugins/") {
                return !self.config.sync_plugins;
            }
            if !self.config.sync_workspace && (rel == "workspace.json" || rel == "workspace-mobile.json") {
                return true;
            }
            return !self.config.sync_settings;
        }

        if !self.config.sync_all_file_types && !path.ends_with(".md") {
            return true;
        }

        false
    }

    /// Whether `path` lies under the editor's configuration subtree — used
    /// by the reconciliation strategies' "config paths behave specially"
    /// rules (§4.7).
    #[must_use]
    pub fn is_config_path(&self, path: &str) -> bool {
        self.under_config_dir(path)
    }
}

/// Compile a `*`/`**` glob pattern into a regex. `*` matches any run of
/// characters within one path segment; `**` matches across segments
/// (including zero). The pattern is anchored so it matches either the
/// whole path from the root or the tail of the path starting at any `/`
/// boundary, so a pattern with no `/` of its own (e.g. `*.tmp`) excludes a
/// matching name at any depth rather than only at the vault root.
fn compile_glob(pattern: &str) -> Regex {
    let mut out = String::from("^(?:.*/)?");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    out.push_str(".*");
                } else {
                    out.push_str("[^/]*");
                }
            }
            '.' | '+' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '$' | '|' | '\\' | '?' => {
                out.push('\\');
                out.push(c);
            }
            other => out.push(other),
        }
    }
    out.push('$');
    Regex::new(&out).unwrap_or_else(|_| Regex::new("$^").expect("empty-match fallback regex"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> ExclusionRules {
        ExclusionRules::new(ExclusionConfig {
            config_dir: ".obsidian".into(),
            own_plugin_dir: "plugins/advanced-sync".into(),
            sync_workspace: false,
            sync_plugins: true,
            sync_settings: true,
            sync_all_file_types: false,
            exclude_globs: vec!["secrets/**".into(), "*.tmp".into()],
        })
    }

    #[test]
    fn own_plugin_dir_always_excluded() {
        let r = rules();
        assert!(r.is_excluded(".obsidian/plugins/advanced-sync/data.json"));
    }

    #[test]
    fn workspace_excluded_when_toggle_off() {
        let r = rules();
        assert!(r.is_excluded(".obsidian/workspace.json"));
    }

    #[test]
    fn plugins_included_when_toggle_on() {
        let r = rules();
        assert!(!r.is_excluded(".obsidian/plugins/other-plugin/main.js"));
    }

    #[test]
    fn settings_excluded_when_toggle_off() {
        let config = ExclusionConfig {
            config_dir: ".obsidian".into(),
            own_plugin_dir: "plugins/advanced-sync".into(),
            sync_workspace: true,
            sync_plugins: true,
            sync_settings: false,
            sync_all_file_types: true,
            exclude_globs: vec![],
        };
        let r = ExclusionRules::new(config);
        assert!(r.is_excluded(".obsidian/app.json"));
        assert!(!r.is_excluded(".obsidian/plugins/other/main.js"), "plugins subtree is carved out of settings toggle");
    }

    #[test]
    fn non_markdown_excluded_outside_config_when_toggle_off() {
        let r = rules();
        assert!(r.is_excluded("attachments/photo.png"));
        assert!(!r.is_excluded("notes/a.md"));
    }

    #[test]
    fn user_globs_match_any_depth() {
        let r = rules();
        assert!(r.is_excluded("secrets/a/b/c.md"));
        assert!(r.is_excluded("notes/draft.tmp"));
        assert!(r.is_excluded("draft.tmp"), "single-segment glob must also match at the vault root");
        assert!(!r.is_excluded("notes/draft.md"));
        assert!(!r.is_excluded("notes/draft.tmpx"), "glob must not match past the pattern's own suffix");
    }

    #[test]
    fn is_config_path_detects_subtree() {
        let r = rules();
        assert!(r.is_config_path(".obsidian/app.json"));
        assert!(!r.is_config_path("notes/a.md"));
    }
}

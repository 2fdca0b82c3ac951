/// Language Registry
///
/// **Core Responsibility:**
/// Map a language identifier to the profile describing how to build and run
/// it inside its dedicated image.
///
/// **Properties:**
/// - Pure data: lookups have no side effects
/// - Loaded once at process start, never mutated afterwards
/// - Adding a language is adding a row; the executor never branches on language
use crate::error::RegistryError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// In-container path where the execution root is mounted read-only
pub const CONTAINER_MOUNT_PATH: &str = "/tmp/code-execution";

/// Placeholder in command templates, expanded to the job's in-container directory
pub const WORKSPACE_PLACEHOLDER: &str = "{workspace}";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    pub name: String,
    pub image: String,
    /// Fixed per language (Java needs `Solution.java` for `public class Solution`)
    pub source_file: String,
    /// argv template; every `{workspace}` is replaced per job
    pub command: Vec<String>,
}

impl LanguageProfile {
    fn new(name: &str, image: &str, source_file: &str, command: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            source_file: source_file.to_string(),
            command: command.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Expand the command template for a job directory inside the container
    pub fn render_command(&self, workspace_dir: &str) -> Vec<String> {
        self.command
            .iter()
            .map(|part| part.replace(WORKSPACE_PLACEHOLDER, workspace_dir))
            .collect()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if self.command.iter().any(|part| part.contains(WORKSPACE_PLACEHOLDER)) {
            Ok(())
        } else {
            Err(RegistryError::MissingPlaceholder(self.name.clone()))
        }
    }
}

#[derive(Debug, Deserialize)]
struct LanguagesFile {
    languages: Vec<LanguageProfile>,
}

#[derive(Debug, Clone)]
pub struct LanguageRegistry {
    profiles: BTreeMap<String, LanguageProfile>,
}

impl LanguageRegistry {
    /// The built-in table: python, cpp, java
    pub fn builtin() -> Self {
        let rows = [
            LanguageProfile::new(
                "python",
                "code-runner-python",
                "main.py",
                &["python", "{workspace}/main.py"],
            ),
            LanguageProfile::new(
                "cpp",
                "code-runner-cpp",
                "main.cpp",
                &["sh", "-c", "g++ {workspace}/main.cpp -o /tmp/main && /tmp/main"],
            ),
            LanguageProfile::new(
                "java",
                "code-runner-java",
                "Solution.java",
                &["sh", "-c", "javac {workspace}/Solution.java -d /tmp && java -cp /tmp Solution"],
            ),
        ];

        Self {
            profiles: rows.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Built-in table extended (or overridden row by row) by a JSON file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let content = fs::read_to_string(path).map_err(|source| RegistryError::Read {
            path: display.clone(),
            source,
        })?;
        let file: LanguagesFile =
            serde_json::from_str(&content).map_err(|source| RegistryError::Parse {
                path: display,
                source,
            })?;

        let mut registry = Self::builtin();
        for profile in file.languages {
            profile.validate()?;
            registry.profiles.insert(profile.name.clone(), profile);
        }
        Ok(registry)
    }

    /// Load from an optional path; `None` yields the built-in table
    pub fn load(path: Option<&str>) -> Result<Self, RegistryError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::builtin()),
        }
    }

    pub fn profile_for(&self, language: &str) -> Option<&LanguageProfile> {
        self.profiles.get(language)
    }

    pub fn is_supported(&self, language: &str) -> bool {
        self.profiles.contains_key(language)
    }

    pub fn languages(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &LanguageProfile> {
        self.profiles.values()
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_table() {
        let registry = LanguageRegistry::builtin();

        let python = registry.profile_for("python").unwrap();
        assert_eq!(python.image, "code-runner-python");
        assert_eq!(python.source_file, "main.py");

        let cpp = registry.profile_for("cpp").unwrap();
        assert_eq!(cpp.image, "code-runner-cpp");
        assert_eq!(cpp.source_file, "main.cpp");

        let java = registry.profile_for("java").unwrap();
        assert_eq!(java.image, "code-runner-java");
        assert_eq!(java.source_file, "Solution.java");

        assert_eq!(registry.languages().collect::<Vec<_>>(), vec!["cpp", "java", "python"]);
    }

    #[test]
    fn test_unknown_language() {
        let registry = LanguageRegistry::builtin();
        assert!(registry.profile_for("ruby").is_none());
        assert!(!registry.is_supported("ruby"));
        // identifiers are exact
        assert!(registry.profile_for("Python").is_none());
    }

    #[test]
    fn test_render_command() {
        let registry = LanguageRegistry::builtin();

        let python = registry.profile_for("python").unwrap();
        assert_eq!(
            python.render_command("/tmp/code-execution/abc"),
            vec!["python", "/tmp/code-execution/abc/main.py"]
        );

        let java = registry.profile_for("java").unwrap();
        let cmd = java.render_command("/tmp/code-execution/abc");
        assert_eq!(cmd[0], "sh");
        assert_eq!(
            cmd[2],
            "javac /tmp/code-execution/abc/Solution.java -d /tmp && java -cp /tmp Solution"
        );
    }

    #[test]
    fn test_every_builtin_has_placeholder() {
        for profile in LanguageRegistry::builtin().profiles() {
            assert!(profile.validate().is_ok(), "{} lacks placeholder", profile.name);
        }
    }

    #[test]
    fn test_load_from_file_extends_builtin() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"languages":[{{"name":"ruby","image":"code-runner-ruby","source_file":"main.rb","command":["ruby","{{workspace}}/main.rb"]}}]}}"#
        )
        .unwrap();

        let registry = LanguageRegistry::load_from_file(file.path()).unwrap();

        assert!(registry.is_supported("ruby"));
        assert!(registry.is_supported("python"));
        assert_eq!(registry.profile_for("ruby").unwrap().source_file, "main.rb");
    }

    #[test]
    fn test_load_rejects_template_without_placeholder() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"languages":[{{"name":"go","image":"code-runner-go","source_file":"main.go","command":["go","run","main.go"]}}]}}"#
        )
        .unwrap();

        let err = LanguageRegistry::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, RegistryError::MissingPlaceholder(name) if name == "go"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = LanguageRegistry::load_from_file("/nonexistent/languages.json").unwrap_err();
        assert!(matches!(err, RegistryError::Read { .. }));
    }
}

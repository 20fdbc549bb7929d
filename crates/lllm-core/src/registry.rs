// Prompt registry
//
// An explicit, ordered map from path to Prompt. The composition root builds
// it and hands it to whoever needs to resolve prompts by path.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::RegistryError;
use crate::prompt::Prompt;

#[derive(Debug, Default, Clone)]
pub struct PromptRegistry {
    prompts: Vec<Arc<Prompt>>,
    index: HashMap<String, usize>,
}

impl PromptRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prompt; a path can only be registered once
    pub fn register(&mut self, prompt: Prompt) -> Result<Arc<Prompt>, RegistryError> {
        self.register_arc(Arc::new(prompt))
    }

    pub fn register_arc(&mut self, prompt: Arc<Prompt>) -> Result<Arc<Prompt>, RegistryError> {
        let path = prompt.path().to_string();
        if self.index.contains_key(&path) {
            return Err(RegistryError::DuplicatePrompt(path));
        }
        self.index.insert(path, self.prompts.len());
        self.prompts.push(Arc::clone(&prompt));
        Ok(prompt)
    }

    /// Look up a prompt by path
    pub fn get(&self, path: &str) -> Result<Arc<Prompt>, RegistryError> {
        self.index
            .get(path)
            .map(|&pos| Arc::clone(&self.prompts[pos]))
            .ok_or_else(|| RegistryError::PromptNotFound(path.to_string()))
    }

    pub fn contains(&self, path: &str) -> bool {
        self.index.contains_key(path)
    }

    /// Paths in registration order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.prompts.iter().map(|p| p.path())
    }

    /// Prompts in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Prompt>> {
        self.prompts.iter()
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt(path: &str) -> Prompt {
        Prompt::builder(path, "Do {thing}").build().unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = PromptRegistry::new();
        registry.register(prompt("tasks/solve")).unwrap();

        let found = registry.get("tasks/solve").unwrap();
        assert_eq!(found.path(), "tasks/solve");
        assert!(registry.contains("tasks/solve"));
    }

    #[test]
    fn test_duplicate_rejected() {
        let mut registry = PromptRegistry::new();
        registry.register(prompt("a")).unwrap();
        assert_eq!(
            registry.register(prompt("a")).unwrap_err(),
            RegistryError::DuplicatePrompt("a".to_string())
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_missing_path() {
        let registry = PromptRegistry::new();
        assert_eq!(
            registry.get("nope").unwrap_err(),
            RegistryError::PromptNotFound("nope".to_string())
        );
    }

    #[test]
    fn test_paths_in_registration_order() {
        let mut registry = PromptRegistry::new();
        for path in ["z/last", "a/first", "m/middle"] {
            registry.register(prompt(path)).unwrap();
        }
        let paths: Vec<_> = registry.paths().collect();
        assert_eq!(paths, vec!["z/last", "a/first", "m/middle"]);
    }
}

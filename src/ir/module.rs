//! A compilation unit holding several independent functions.

use std::collections::HashSet;

use crate::{ir::Function, Error, Result};

/// Ordered collection of functions.
///
/// Functions share no mutable state, so passes may process them in parallel.
/// Function names are symbols and must be unique: [`Module::push`] enforces
/// it, and a module collected from an iterator is checked when a
/// [`PassScheduler`](crate::compiler::PassScheduler) runs over it.
#[derive(Debug, Clone, Default)]
pub struct Module {
    functions: Vec<Function>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a function.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateFunction`] if a function of the same name is
    /// already in the module.
    pub fn push(&mut self, func: Function) -> Result<()> {
        if self.function(func.name()).is_some() {
            return Err(Error::DuplicateFunction(func.name().to_string()));
        }
        self.functions.push(func);
        Ok(())
    }

    /// The first function name that occurs more than once, if any.
    #[must_use]
    pub fn duplicate_name(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.functions
            .iter()
            .map(Function::name)
            .find(|name| !seen.insert(*name))
    }

    /// Number of functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Returns true if the module has no functions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Looks a function up by symbol name.
    #[must_use]
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    /// All functions in order.
    #[must_use]
    pub fn functions(&self) -> &[Function] {
        &self.functions
    }

    /// Mutable access to all functions.
    pub fn functions_mut(&mut self) -> &mut [Function] {
        &mut self.functions
    }
}

impl FromIterator<Function> for Module {
    fn from_iter<T: IntoIterator<Item = Function>>(iter: T) -> Self {
        Self {
            functions: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_by_name() {
        let module: Module = ["a", "b"].into_iter().map(Function::new).collect();
        assert_eq!(module.len(), 2);
        assert!(module.function("b").is_some());
        assert!(module.function("c").is_none());
        assert_eq!(module.duplicate_name(), None);
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let mut module = Module::new();
        module.push(Function::new("k")).unwrap();
        assert_eq!(
            module.push(Function::new("k")),
            Err(Error::DuplicateFunction("k".to_string()))
        );
        assert_eq!(module.len(), 1);

        let collected: Module = ["k", "j", "k"].into_iter().map(Function::new).collect();
        assert_eq!(collected.duplicate_name(), Some("k"));
    }
}

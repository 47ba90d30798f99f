//! Per-module rewrite hooks.
//!
//! A [`MergeHook`] names one class of a module and describes narrow edits to it: truncating
//! its constructor after the `super()` call, removing instance methods or clearing their
//! bodies, and moving private fields into the public namespace. The hook only answers
//! questions; all matching happens in the merge session against the raw bytes of the module's
//! constant pool, so no name is ever decoded into a `String` for comparison.
//!
//! [`ClassRewrite`] is the stock implementation, built fluently:
//!
//! ```rust
//! use abcmerge::merge::hooks::{ClassRewrite, MergeHook, Visibility};
//!
//! let hook = ClassRewrite::new("Preloader")
//!     .truncate_constructor()
//!     .remove_method("trace", Visibility::Protected)
//!     .clear_method("run", Visibility::Public)
//!     .publish("config");
//!
//! assert_eq!(hook.class_name(), "Preloader");
//! assert_eq!(hook.method_rules().len(), 2);
//! assert_eq!(hook.instance_trait_delta(), None);
//! ```

use crate::{
    abc::constants::{ConstantKind, TraitKind},
    pool::QualifiedName,
};

/// Namespace an instance method is declared in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// The package namespace
    Public,
    /// The class's protected namespace
    Protected,
    /// The class's private namespace
    Private,
}

impl Visibility {
    /// Namespace kind a matching trait name must carry.
    #[must_use]
    pub fn namespace_kind(self) -> ConstantKind {
        match self {
            Visibility::Public => ConstantKind::PackageNamespace,
            Visibility::Protected => ConstantKind::ProtectedNamespace,
            Visibility::Private => ConstantKind::PrivateNamespace,
        }
    }
}

/// What happens to a matched instance method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleAction {
    /// The trait is dropped from the instance
    Remove,
    /// The trait stays, its body is replaced by an empty one
    ClearBody,
}

/// Selects one instance method (or accessor) by local name and visibility.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRule {
    /// Local name of the trait
    pub name: String,
    /// Namespace the trait is declared in
    pub visibility: Visibility,
    /// Edit applied on a match
    pub action: RuleAction,
}

impl MethodRule {
    /// Creates a rule.
    pub fn new(name: impl Into<String>, visibility: Visibility, action: RuleAction) -> Self {
        MethodRule {
            name: name.into(),
            visibility,
            action,
        }
    }

    /// Whether the trait named `name` is selected by this rule.
    #[must_use]
    pub fn matches(&self, name: &QualifiedName<'_>) -> bool {
        name.namespace_kind == Some(self.visibility.namespace_kind())
            && name.name == self.name.as_bytes()
    }
}

/// Decisions the merge session asks of a module while writing it.
pub trait MergeHook: Send + Sync {
    /// Local name of the public class the hook applies to.
    fn class_name(&self) -> &str;

    /// Stop the constructor after its `constructsuper` and return.
    fn truncates_constructor(&self) -> bool {
        false
    }

    /// Rules for the class's instance methods, getters and setters.
    fn method_rules(&self) -> &[MethodRule] {
        &[]
    }

    /// Local names of private fields that move into the module's public namespace.
    fn published_names(&self) -> &[String] {
        &[]
    }

    /// Fixed correction of the matched class's instance trait count.
    ///
    /// `None` lets the session count the traits its removing rules actually select.
    fn instance_trait_delta(&self) -> Option<i64> {
        None
    }
}

/// Whether an instance named `name` is the public class `class`.
#[must_use]
pub fn matches_class(name: &QualifiedName<'_>, class: &str) -> bool {
    name.namespace_kind == Some(ConstantKind::PackageNamespace) && name.name == class.as_bytes()
}

/// Whether a field named `name` is a private field listed in `published`.
#[must_use]
pub fn matches_published(name: &QualifiedName<'_>, published: &[String]) -> bool {
    name.namespace_kind == Some(ConstantKind::PrivateNamespace)
        && published.iter().any(|field| field.as_bytes() == name.name)
}

/// Whether a trait of `kind` is subject to method rules at all.
#[must_use]
pub fn is_rewritable_method(kind: TraitKind) -> bool {
    matches!(kind, TraitKind::Method | TraitKind::Getter | TraitKind::Setter)
}

/// First rule of `rules` that selects `name`.
#[must_use]
pub fn find_rule<'r>(rules: &'r [MethodRule], name: &QualifiedName<'_>) -> Option<&'r MethodRule> {
    rules.iter().find(|rule| rule.matches(name))
}

/// A [`MergeHook`] assembled from explicit rules.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassRewrite {
    class_name: String,
    truncate_constructor: bool,
    rules: Vec<MethodRule>,
    published: Vec<String>,
}

impl ClassRewrite {
    /// A rewrite of public class `class_name` that changes nothing yet.
    pub fn new(class_name: impl Into<String>) -> Self {
        ClassRewrite {
            class_name: class_name.into(),
            ..Default::default()
        }
    }

    /// Truncate the constructor after the superclass constructor call.
    #[must_use]
    pub fn truncate_constructor(mut self) -> Self {
        self.truncate_constructor = true;
        self
    }

    /// Drop the instance method `name`.
    #[must_use]
    pub fn remove_method(mut self, name: impl Into<String>, visibility: Visibility) -> Self {
        self.rules
            .push(MethodRule::new(name, visibility, RuleAction::Remove));
        self
    }

    /// Keep the instance method `name` but empty its body.
    #[must_use]
    pub fn clear_method(mut self, name: impl Into<String>, visibility: Visibility) -> Self {
        self.rules
            .push(MethodRule::new(name, visibility, RuleAction::ClearBody));
        self
    }

    /// Move the private field `name` into the public namespace.
    #[must_use]
    pub fn publish(mut self, name: impl Into<String>) -> Self {
        self.published.push(name.into());
        self
    }
}

impl MergeHook for ClassRewrite {
    fn class_name(&self) -> &str {
        &self.class_name
    }

    fn truncates_constructor(&self) -> bool {
        self.truncate_constructor
    }

    fn method_rules(&self) -> &[MethodRule] {
        &self.rules
    }

    fn published_names(&self) -> &[String] {
        &self.published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(kind: ConstantKind, local: &'static str) -> QualifiedName<'static> {
        QualifiedName {
            namespace: 1,
            namespace_kind: Some(kind),
            name: local.as_bytes(),
        }
    }

    #[test]
    fn class_matching_requires_package_namespace() {
        assert!(matches_class(&name(ConstantKind::PackageNamespace, "Main"), "Main"));
        assert!(!matches_class(&name(ConstantKind::PackageNamespace, "Main2"), "Main"));
        assert!(!matches_class(
            &name(ConstantKind::PackageInternalNamespace, "Main"),
            "Main"
        ));
    }

    #[test]
    fn rules_select_by_visibility() {
        let hook = ClassRewrite::new("Main")
            .remove_method("log", Visibility::Private)
            .clear_method("log", Visibility::Public);

        let private = name(ConstantKind::PrivateNamespace, "log");
        let public = name(ConstantKind::PackageNamespace, "log");
        let protected = name(ConstantKind::ProtectedNamespace, "log");

        assert_eq!(
            find_rule(hook.method_rules(), &private).map(|rule| rule.action),
            Some(RuleAction::Remove)
        );
        assert_eq!(
            find_rule(hook.method_rules(), &public).map(|rule| rule.action),
            Some(RuleAction::ClearBody)
        );
        assert!(find_rule(hook.method_rules(), &protected).is_none());
        assert_eq!(hook.instance_trait_delta(), None);
    }

    #[test]
    fn accessors_and_methods_are_rewritable() {
        assert!(is_rewritable_method(TraitKind::Method));
        assert!(is_rewritable_method(TraitKind::Getter));
        assert!(is_rewritable_method(TraitKind::Setter));
        assert!(!is_rewritable_method(TraitKind::Slot));
        assert!(!is_rewritable_method(TraitKind::Function));
    }

    #[test]
    fn only_private_fields_are_published() {
        let published = vec!["state".to_string()];
        assert!(matches_published(
            &name(ConstantKind::PrivateNamespace, "state"),
            &published
        ));
        assert!(!matches_published(
            &name(ConstantKind::PackageNamespace, "state"),
            &published
        ));
        assert!(!matches_published(
            &name(ConstantKind::PrivateNamespace, "other"),
            &published
        ));
    }
}

//! Desired-versus-current comparison for a single (entity, property) pair.

use propsync_core::{Action, Diff, EntityId, PropertyName};

/// Compare `current` with `desired` and classify the pair.
///
/// Values are compared byte for byte: no trimming, no case folding. Two unset
/// values are equal.
pub fn diff(
    entity_id: &EntityId,
    property: &PropertyName,
    current: Option<String>,
    desired: Option<String>,
) -> Diff {
    let action = if current == desired {
        Action::Noop
    } else {
        Action::Update
    };
    Diff {
        entity_id: entity_id.clone(),
        property: property.clone(),
        old_value: current,
        new_value: desired,
        action,
    }
}

/// Render a value for log lines; unset shows as `(empty)`.
pub fn display_value(value: Option<&str>) -> &str {
    value.unwrap_or("(empty)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(current: Option<&str>, desired: Option<&str>) -> Diff {
        diff(
            &EntityId::from("repo-a"),
            &PropertyName::from("customer_tier"),
            current.map(str::to_owned),
            desired.map(str::to_owned),
        )
    }

    #[test]
    fn equal_values_are_noop() {
        assert_eq!(run(Some("free"), Some("free")).action, Action::Noop);
    }

    #[test]
    fn both_unset_is_noop() {
        assert_eq!(run(None, None).action, Action::Noop);
    }

    #[test]
    fn changed_value_is_update_with_old_and_new() {
        let d = run(Some("professional"), Some("enterprise"));
        assert_eq!(d.action, Action::Update);
        assert_eq!(d.old_value.as_deref(), Some("professional"));
        assert_eq!(d.new_value.as_deref(), Some("enterprise"));
    }

    #[test]
    fn setting_and_clearing_are_updates() {
        assert!(run(None, Some("free")).is_update());
        assert!(run(Some("free"), None).is_update());
    }

    #[test]
    fn comparison_is_exact() {
        assert!(run(Some("Enterprise"), Some("enterprise")).is_update());
        assert!(run(Some("free "), Some("free")).is_update());
        assert!(run(Some(""), None).is_update());
    }

    #[test]
    fn display_value_marks_unset() {
        assert_eq!(display_value(None), "(empty)");
        assert_eq!(display_value(Some("free")), "free");
    }
}

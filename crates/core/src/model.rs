//! Model name helpers shared by executors and routing.

/// Split a trailing parenthesized reasoning-effort tag off a model id.
///
/// `"gpt-5.2(xhigh)"` → `("gpt-5.2", Some("(xhigh)"))`. The tag is stripped
/// for the upstream call but preserved so mappings and response echoes keep
/// the caller's original spelling.
pub fn split_reasoning_suffix(model: &str) -> (&str, Option<&str>) {
    if model.ends_with(')')
        && let Some(open) = model.rfind('(')
        && open > 0
    {
        return (&model[..open], Some(&model[open..]));
    }
    (model, None)
}

/// Re-attach a reasoning suffix produced by [`split_reasoning_suffix`].
pub fn with_reasoning_suffix(base: &str, suffix: Option<&str>) -> String {
    match suffix {
        Some(s) => format!("{base}{s}"),
        None => base.to_string(),
    }
}

/// Rewrite the `model` field of a JSON payload in place.
pub fn rewrite_model_field(payload: &[u8], model: &str) -> Option<Vec<u8>> {
    let mut val: serde_json::Value = serde_json::from_slice(payload).ok()?;
    let obj = val.as_object_mut()?;
    obj.insert(
        "model".to_string(),
        serde_json::Value::String(model.to_string()),
    );
    serde_json::to_vec(&val).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_reasoning_suffix() {
        assert_eq!(
            split_reasoning_suffix("gpt-5.2(xhigh)"),
            ("gpt-5.2", Some("(xhigh)"))
        );
        assert_eq!(split_reasoning_suffix("gpt-5.2"), ("gpt-5.2", None));
        // A bare parenthesized string is not a suffix
        assert_eq!(split_reasoning_suffix("(xhigh)"), ("(xhigh)", None));
    }

    #[test]
    fn test_suffix_round_trip() {
        let (base, suffix) = split_reasoning_suffix("claude-opus(low)");
        assert_eq!(with_reasoning_suffix(base, suffix), "claude-opus(low)");
        let (base, suffix) = split_reasoning_suffix("claude-opus");
        assert_eq!(with_reasoning_suffix(base, suffix), "claude-opus");
    }

    #[test]
    fn test_rewrite_model_field() {
        let body = br#"{"model":"a","messages":[]}"#;
        let out = rewrite_model_field(body, "b").unwrap();
        let val: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(val["model"], "b");
    }
}

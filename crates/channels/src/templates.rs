//! `{{placeholder}}` substitution for message bodies.

use leadflow_core::types::Lead;

pub const KNOWN_PLACEHOLDERS: &[&str] =
    &["name", "first_name", "phone", "email", "status", "source"];

fn lookup(lead: &Lead, key: &str) -> Option<String> {
    let value = match key {
        "name" => lead.name.clone(),
        "first_name" => lead.first_name().to_string(),
        "phone" => lead.phone.clone(),
        "email" => lead.email.clone().unwrap_or_default(),
        "status" => lead.status.as_str().to_string(),
        "source" => lead.source.clone().unwrap_or_default(),
        _ => return None,
    };
    Some(value)
}

/// Fill a template from a lead. Unknown placeholders are kept verbatim and
/// missing optional fields render as empty strings.
pub fn render_template(template: &str, lead: &Lead) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let key = after[..close].trim();
                match lookup(lead, key) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[open..open + 2 + close + 2]),
                }
                rest = &after[close + 2..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Problems that would make a template render oddly. Empty when valid.
pub fn validate_template(template: &str) -> Vec<String> {
    let mut issues = Vec::new();
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        let after = &rest[open + 2..];
        let Some(close) = after.find("}}") else {
            issues.push("unclosed '{{' placeholder".to_string());
            return issues;
        };
        let key = after[..close].trim();
        if key.contains("{{") {
            issues.push(format!("nested placeholder in '{{{{{key}}}}}'"));
        } else if !KNOWN_PLACEHOLDERS.contains(&key) {
            issues.push(format!("unknown placeholder '{{{{{key}}}}}'"));
        }
        rest = &after[close + 2..];
    }
    if rest.contains("}}") {
        issues.push("unmatched '}}'".to_string());
    }
    issues
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leadflow_core::types::LeadStatus;
    use uuid::Uuid;

    fn lead() -> Lead {
        let now = Utc::now();
        Lead {
            id: Uuid::new_v4(),
            name: "Maria Silva".into(),
            phone: "5511988887777".into(),
            email: None,
            status: LeadStatus::Qualified,
            source: Some("instagram".into()),
            tags: vec![],
            notes: None,
            opted_out: false,
            opted_out_at: None,
            opt_out_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_render_known_placeholders() {
        let body = render_template(
            "Hi {{first_name}}, thanks for finding us on {{ source }}. Status: {{status}}",
            &lead(),
        );
        assert_eq!(body, "Hi Maria, thanks for finding us on instagram. Status: qualified");
    }

    #[test]
    fn test_render_keeps_unknown_and_blanks_missing() {
        let body = render_template("{{coupon}} for {{email}}!", &lead());
        assert_eq!(body, "{{coupon}} for !");
    }

    #[test]
    fn test_render_unclosed_is_literal() {
        assert_eq!(render_template("Hello {{name", &lead()), "Hello {{name");
    }

    #[test]
    fn test_validate() {
        assert!(validate_template("Hi {{first_name}}").is_empty());
        assert_eq!(validate_template("Hi {{coupon}}").len(), 1);
        assert_eq!(validate_template("Hi {{name").len(), 1);
        assert_eq!(validate_template("Hi name}}").len(), 1);
    }
}

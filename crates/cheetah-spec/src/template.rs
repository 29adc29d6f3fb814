//! `{name}` placeholder templates used by component arguments, environments and paths.
//!
//! `{{` and `}}` produce literal braces. Anything else inside braces is a
//! placeholder name resolved against the run bindings.

use cheetah_core::errors::{CampError, ErrorInfo};

/// Parsed piece of a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text copied verbatim.
    Literal(String),
    /// Placeholder name.
    Placeholder(&'a str),
}

fn template_error(code: &str, message: &str, template: &str) -> CampError {
    CampError::Template(ErrorInfo::new(code, message).with_context("template", template))
}

/// Splits a template into literal and placeholder segments.
pub fn parse(template: &str) -> Result<Vec<Segment<'_>>, CampError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        literal.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            literal.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            literal.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('}') {
            return Err(template_error(
                "template.unmatched-brace",
                "closing brace without matching opening brace",
                template,
            ));
        } else {
            let close = tail.find('}').ok_or_else(|| {
                template_error(
                    "template.unterminated",
                    "placeholder is missing its closing brace",
                    template,
                )
            })?;
            let name = tail[1..close].trim();
            if name.is_empty() || name.contains('{') {
                return Err(template_error(
                    "template.bad-placeholder",
                    "placeholder name must be a non-empty identifier",
                    template,
                ));
            }
            if !literal.is_empty() {
                segments.push(Segment::Literal(std::mem::take(&mut literal)));
            }
            segments.push(Segment::Placeholder(name));
            rest = &tail[close + 1..];
        }
    }
    literal.push_str(rest);
    if !literal.is_empty() {
        segments.push(Segment::Literal(literal));
    }
    Ok(segments)
}

/// Placeholder names referenced by the template, in order of appearance.
pub fn placeholders(template: &str) -> Result<Vec<&str>, CampError> {
    Ok(parse(template)?
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name),
            Segment::Literal(_) => None,
        })
        .collect())
}

/// Substitutes every placeholder through `lookup`.
///
/// A placeholder `lookup` cannot resolve is a [`CampError::Template`].
pub fn render<F>(template: &str, lookup: F) -> Result<String, CampError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    for segment in parse(template)? {
        match segment {
            Segment::Literal(text) => out.push_str(&text),
            Segment::Placeholder(name) => {
                let value = lookup(name).ok_or_else(|| {
                    CampError::Template(
                        ErrorInfo::new(
                            "template.unknown-placeholder",
                            format!("placeholder `{{{name}}}` does not name a swept parameter"),
                        )
                        .with_context("placeholder", name)
                        .with_context("template", template),
                    )
                })?;
                out.push_str(&value);
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "size" => Some("10".into()),
            "mode" => Some("fast".into()),
            _ => None,
        }
    }

    #[test]
    fn substitutes_and_unescapes() {
        let out = render("--size={size} {{literal}} {mode}", lookup).expect("render");
        assert_eq!(out, "--size=10 {literal} fast");
    }

    #[test]
    fn unknown_placeholder_is_template_error() {
        let err = render("--n {nprocs}", lookup).expect_err("unknown");
        assert!(matches!(err, CampError::Template(ref info) if info.code == "template.unknown-placeholder"));
        assert_eq!(err.info().context["placeholder"], "nprocs");
    }

    #[test]
    fn malformed_templates_are_rejected() {
        for bad in ["{size", "size}", "{}", "{ }"] {
            let err = parse(bad).expect_err(bad);
            assert!(matches!(err, CampError::Template(_)), "{bad}");
        }
    }

    #[test]
    fn lists_placeholders_in_order() {
        assert_eq!(
            placeholders("{b}-{a}-{b}").expect("parse"),
            vec!["b", "a", "b"]
        );
    }
}

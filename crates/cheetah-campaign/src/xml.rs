//! Attribute edits on XML inputs, applied to the bytes copied into a run.
//!
//! The document is streamed through unchanged except for the start tags that
//! match an edit path; text, comments and declarations are written back as read.

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_spec::XmlStep;
use quick_xml::events::{BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::render::RenderedXmlEdit;

fn xml_error(code: &str, err: impl ToString) -> CampError {
    CampError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn path_text(steps: &[XmlStep]) -> String {
    steps
        .iter()
        .map(|step| match &step.filter {
            Some((key, value)) => format!("{}[{key}={value}]", step.tag),
            None => step.tag.clone(),
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Applies every edit in order. An edit whose path matches no element fails.
pub fn apply_xml_edits(source: &[u8], edits: &[RenderedXmlEdit]) -> Result<Vec<u8>, CampError> {
    let mut bytes = source.to_vec();
    for edit in edits {
        let (edited, matches) = apply_one(&bytes, edit)?;
        if matches == 0 {
            return Err(CampError::Template(
                ErrorInfo::new("xml.no-match", "XML edit path matches no element")
                    .with_context("path", path_text(&edit.steps))
                    .with_context("attribute", edit.attribute.as_str()),
            ));
        }
        bytes = edited;
    }
    Ok(bytes)
}

fn apply_one(source: &[u8], edit: &RenderedXmlEdit) -> Result<(Vec<u8>, usize), CampError> {
    let mut reader = Reader::from_reader(source);
    let mut writer = Writer::new(Vec::with_capacity(source.len()));
    let mut buf = Vec::new();
    // One entry per open element: whether it lies on the edit path.
    let mut chain: Vec<bool> = Vec::new();
    let mut matches = 0;
    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|err| xml_error("xml.parse", err))?;
        let event = match event {
            Event::Eof => break,
            Event::Start(start) => {
                let (on_path, start) = visit(&chain, start, edit, &mut matches)?;
                chain.push(on_path);
                Event::Start(start)
            }
            Event::Empty(start) => {
                let (_, start) = visit(&chain, start, edit, &mut matches)?;
                Event::Empty(start)
            }
            Event::End(end) => {
                chain.pop();
                Event::End(end)
            }
            other => other,
        };
        writer
            .write_event(event)
            .map_err(|err| xml_error("xml.write", err))?;
        buf.clear();
    }
    Ok((writer.into_inner(), matches))
}

fn visit<'a>(
    chain: &[bool],
    start: BytesStart<'a>,
    edit: &RenderedXmlEdit,
    matches: &mut usize,
) -> Result<(bool, BytesStart<'a>), CampError> {
    let depth = chain.len();
    let on_path = if depth == 0 {
        true
    } else if chain.last() == Some(&true) {
        match edit.steps.get(depth - 1) {
            Some(step) => step_matches(step, &start)?,
            None => false,
        }
    } else {
        false
    };
    if on_path && depth == edit.steps.len() {
        *matches += 1;
        return Ok((true, set_attribute(&start, &edit.attribute, &edit.value)?));
    }
    Ok((on_path, start))
}

fn step_matches(step: &XmlStep, start: &BytesStart<'_>) -> Result<bool, CampError> {
    if start.name().as_ref() != step.tag.as_bytes() {
        return Ok(false);
    }
    let Some((key, expected)) = &step.filter else {
        return Ok(true);
    };
    for attr in start.attributes() {
        let attr = attr.map_err(|err| xml_error("xml.attribute", err))?;
        if attr.key.as_ref() == key.as_bytes() {
            return Ok(attr.value.as_ref() == expected.as_bytes());
        }
    }
    Ok(false)
}

fn set_attribute(
    start: &BytesStart<'_>,
    name: &str,
    value: &str,
) -> Result<BytesStart<'static>, CampError> {
    let tag = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut edited = BytesStart::new(tag);
    let mut replaced = false;
    for attr in start.attributes() {
        let attr = attr.map_err(|err| xml_error("xml.attribute", err))?;
        if attr.key.as_ref() == name.as_bytes() {
            edited.push_attribute((name, value));
            replaced = true;
        } else {
            edited.push_attribute(attr);
        }
    }
    if !replaced {
        edited.push_attribute((name, value));
    }
    Ok(edited)
}

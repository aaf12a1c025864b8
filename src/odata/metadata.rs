//! `$metadata` parsing
//!
//! Converts EDMX XML into a JSON tree: attributes become `@name` keys, text
//! content `#text`, repeated child elements become arrays and empty elements
//! `null`. Element names keep their namespace prefix (`edmx:Edmx`).

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Result, SapError};

struct Element {
    name: String,
    fields: Map<String, Value>,
    text: String,
}

impl Element {
    fn open(start: &BytesStart<'_>) -> Result<Self> {
        let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
        let mut fields = Map::new();

        for attr in start.attributes() {
            let attr = attr.map_err(|e| invalid_xml(&e))?;
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let value = attr.unescape_value().map_err(|e| invalid_xml(&e))?;
            fields.insert(format!("@{}", key), Value::String(value.into_owned()));
        }

        Ok(Self {
            name,
            fields,
            text: String::new(),
        })
    }

    fn close(mut self) -> (String, Value) {
        let value = match (self.fields.is_empty(), self.text.is_empty()) {
            (true, true) => Value::Null,
            (true, false) => Value::String(self.text),
            (false, _) => {
                if !self.text.is_empty() {
                    self.fields.insert("#text".to_string(), Value::String(self.text));
                }
                Value::Object(self.fields)
            }
        };
        (self.name, value)
    }
}

fn invalid_xml(err: &dyn std::fmt::Display) -> SapError {
    SapError::Validation(format!("Failed to parse metadata XML: {}", err))
}

/// Insert a child, turning repeated names into arrays
fn push_child(parent: &mut Map<String, Value>, name: String, value: Value) {
    match parent.get_mut(&name) {
        None => {
            parent.insert(name, value);
        }
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
    }
}

/// Parse an XML document into a JSON tree
pub fn parse_xml(xml: &str) -> Result<Value> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root = Map::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(start)) => stack.push(Element::open(&start)?),
            Ok(Event::Empty(start)) => {
                let (name, value) = Element::open(&start)?.close();
                match stack.last_mut() {
                    Some(parent) => push_child(&mut parent.fields, name, value),
                    None => push_child(&mut root, name, value),
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| SapError::Validation("Unexpected closing tag".into()))?;
                let (name, value) = element.close();
                match stack.last_mut() {
                    Some(parent) => push_child(&mut parent.fields, name, value),
                    None => push_child(&mut root, name, value),
                }
            }
            Ok(Event::Text(text)) => {
                let text = text.unescape().map_err(|e| invalid_xml(&e))?;
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text);
                }
            }
            Ok(Event::CData(data)) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&String::from_utf8_lossy(&data));
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(invalid_xml(&e)),
        }
    }

    if let Some(open) = stack.last() {
        return Err(SapError::Validation(format!(
            "Failed to parse metadata XML: unclosed element <{}>",
            open.name
        )));
    }
    if root.is_empty() {
        return Err(SapError::Validation(
            "Failed to parse metadata XML: document has no root element".into(),
        ));
    }

    Ok(Value::Object(root))
}

/// Entity type summary extracted from a parsed metadata tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityTypeInfo {
    pub name: String,
    pub keys: Vec<String>,
    pub properties: Vec<String>,
    pub navigations: Vec<String>,
}

/// `value` as a list, whether it held one element or many
fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![other],
    }
}

fn names_of(value: Option<&Value>) -> Vec<String> {
    as_list(value)
        .into_iter()
        .filter_map(|v| v.get("@Name").and_then(Value::as_str))
        .map(String::from)
        .collect()
}

/// Walk `edmx:Edmx / edmx:DataServices / Schema / EntityType` and list each type
pub fn entity_types(metadata: &Value) -> Vec<EntityTypeInfo> {
    let data_services = metadata
        .get("edmx:Edmx")
        .and_then(|edmx| edmx.get("edmx:DataServices"));

    as_list(data_services.and_then(|ds| ds.get("Schema")))
        .into_iter()
        .flat_map(|schema| as_list(schema.get("EntityType")))
        .filter_map(|entity| {
            let name = entity.get("@Name")?.as_str()?.to_string();
            let keys = names_of(entity.get("Key").and_then(|k| k.get("PropertyRef")));
            Some(EntityTypeInfo {
                name,
                keys,
                properties: names_of(entity.get("Property")),
                navigations: names_of(entity.get("NavigationProperty")),
            })
        })
        .collect()
}

/// Names of all entity sets declared in the entity containers
pub fn entity_sets(metadata: &Value) -> Vec<String> {
    let data_services = metadata
        .get("edmx:Edmx")
        .and_then(|edmx| edmx.get("edmx:DataServices"));

    as_list(data_services.and_then(|ds| ds.get("Schema")))
        .into_iter()
        .flat_map(|schema| as_list(schema.get("EntityContainer")))
        .flat_map(|container| names_of(container.get("EntitySet")))
        .collect()
}

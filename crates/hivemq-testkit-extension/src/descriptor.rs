//! Extension descriptor (`hivemq-extension.xml`)
//!
//! [`DescriptorFields`] is what fixture authors fill in; [`ExtensionDescriptor`] only
//! exists after [`ExtensionDescriptor::validate`] accepted those fields, so every
//! other component can rely on a well-formed descriptor.

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tera::{Context, Tera};

use crate::error::{AssemblyError, ValidationError};

/// Descriptor file name at the root of an extension directory
pub const DESCRIPTOR_FILE_NAME: &str = "hivemq-extension.xml";

const TEMPLATE_NAME: &str = "hivemq-extension.xml";

/// Unvalidated descriptor input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DescriptorFields {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub start_priority: i64,
}

impl DescriptorFields {
    pub fn new(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            ..Default::default()
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn start_priority(mut self, start_priority: i64) -> Self {
        self.start_priority = start_priority;
        self
    }

    /// Shorthand for [`ExtensionDescriptor::validate`]
    pub fn validate(self) -> Result<ExtensionDescriptor, ValidationError> {
        ExtensionDescriptor::validate(self)
    }

    /// Read the fields of an existing `hivemq-extension.xml`
    ///
    /// Unknown elements are ignored; missing ones keep their defaults.
    pub fn from_xml(xml: &str) -> Result<Self, AssemblyError> {
        let mut reader = Reader::from_str(xml);
        reader.config_mut().trim_text(true);

        let mut fields = Self::default();
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();

        loop {
            match reader.read_event() {
                Err(e) => {
                    return Err(AssemblyError::malformed(format!(
                        "XML error at position {}: {}",
                        reader.buffer_position(),
                        e
                    )))
                }
                Ok(Event::Eof) => break,
                Ok(Event::Start(e)) => {
                    stack.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
                    text.clear();
                }
                Ok(Event::Text(t)) => {
                    let value = t
                        .unescape()
                        .map_err(|e| AssemblyError::malformed(e.to_string()))?;
                    text.push_str(&value);
                }
                Ok(Event::End(_)) => {
                    let value = std::mem::take(&mut text).trim().to_string();
                    let path: Vec<&str> = stack.iter().map(String::as_str).collect();
                    match path.as_slice() {
                        ["hivemq-extension", "id"] => fields.id = value,
                        ["hivemq-extension", "version"] => fields.version = value,
                        ["hivemq-extension", "name"] => fields.name = value,
                        ["hivemq-extension", "author"] => fields.author = value,
                        ["hivemq-extension", "priority"] => {
                            fields.priority = parse_priority("priority", &value)?
                        }
                        ["hivemq-extension", "start-priority"] => {
                            fields.start_priority = parse_priority("start-priority", &value)?
                        }
                        _ => {}
                    }
                    stack.pop();
                }
                Ok(_) => {}
            }
        }

        if !stack.is_empty() {
            return Err(AssemblyError::malformed("unexpected end of document"));
        }
        Ok(fields)
    }
}

/// A well-formed extension descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtensionDescriptor {
    id: String,
    version: String,
    name: String,
    author: String,
    priority: u32,
    start_priority: u32,
}

impl ExtensionDescriptor {
    /// Check well-formedness; pure, no I/O
    ///
    /// Checks run in field order, so an empty id is reported even when the
    /// version is empty too. An empty name falls back to the id.
    pub fn validate(fields: DescriptorFields) -> Result<Self, ValidationError> {
        let id = fields.id.trim();
        if id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if !is_directory_name(id) {
            return Err(ValidationError::IllegalIdCharacter { id: id.to_string() });
        }

        let version = fields.version.trim();
        if version.is_empty() {
            return Err(ValidationError::EmptyVersion);
        }

        let priority = priority_value("priority", fields.priority)?;
        let start_priority = priority_value("start-priority", fields.start_priority)?;

        let name = match fields.name.trim() {
            "" => id.to_string(),
            name => name.to_string(),
        };

        Ok(Self {
            id: id.to_string(),
            version: version.to_string(),
            name,
            author: fields.author.trim().to_string(),
            priority,
            start_priority,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn author(&self) -> &str {
        &self.author
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }

    pub fn start_priority(&self) -> u32 {
        self.start_priority
    }

    /// Read and validate `<dir>/hivemq-extension.xml`
    pub fn read_from_dir(dir: &Path) -> Result<Self, AssemblyError> {
        let path = dir.join(DESCRIPTOR_FILE_NAME);
        let xml = fs::read_to_string(&path).map_err(|e| AssemblyError::io(&path, e))?;
        Ok(DescriptorFields::from_xml(&xml)?.validate()?)
    }

    /// Render the descriptor XML
    pub fn render(&self) -> Result<String, tera::Error> {
        let mut tera = Tera::default();
        tera.add_raw_template(TEMPLATE_NAME, include_str!("templates/hivemq-extension.xml.tera"))?;
        tera.render(TEMPLATE_NAME, &Context::from_serialize(self)?)
    }
}

impl From<ExtensionDescriptor> for DescriptorFields {
    fn from(descriptor: ExtensionDescriptor) -> Self {
        Self {
            id: descriptor.id,
            version: descriptor.version,
            name: descriptor.name,
            author: descriptor.author,
            priority: i64::from(descriptor.priority),
            start_priority: i64::from(descriptor.start_priority),
        }
    }
}

const MAX_PRIORITY: i64 = i32::MAX as i64;

fn priority_value(field: &'static str, value: i64) -> Result<u32, ValidationError> {
    if value < 0 {
        return Err(ValidationError::NegativePriority { field, value });
    }
    u32::try_from(value)
        .ok()
        .filter(|v| i64::from(*v) <= MAX_PRIORITY)
        .ok_or(ValidationError::PriorityTooLarge {
            field,
            value,
            max: MAX_PRIORITY,
        })
}

fn parse_priority(field: &str, value: &str) -> Result<i64, AssemblyError> {
    if value.is_empty() {
        return Ok(0);
    }
    value
        .parse()
        .map_err(|_| AssemblyError::malformed(format!("{} '{}' is not an integer", field, value)))
}

fn is_directory_name(id: &str) -> bool {
    id != "." && id != ".." && !id.chars().any(|c| matches!(c, '/' | '\\' | ':') || c.is_control())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_descriptor() {
        let descriptor = DescriptorFields::new("my-extension", "1.0.0")
            .name("My Extension")
            .author("Acme")
            .priority(1000)
            .validate()
            .unwrap();

        assert_eq!(descriptor.id(), "my-extension");
        assert_eq!(descriptor.name(), "My Extension");
        assert_eq!(descriptor.priority(), 1000);
        assert_eq!(descriptor.start_priority(), 0);
    }

    #[test]
    fn test_empty_id_is_reported_first() {
        let err = DescriptorFields::new("  ", "").priority(-1).validate().unwrap_err();
        assert_eq!(err, ValidationError::EmptyId);
    }

    #[test]
    fn test_empty_version() {
        let err = DescriptorFields::new("ext", " ").validate().unwrap_err();
        assert_eq!(err, ValidationError::EmptyVersion);
    }

    #[test]
    fn test_negative_priorities() {
        let err = DescriptorFields::new("ext", "1").priority(-5).validate().unwrap_err();
        assert_eq!(
            err,
            ValidationError::NegativePriority {
                field: "priority",
                value: -5
            }
        );

        let err = DescriptorFields::new("ext", "1")
            .start_priority(-1)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ValidationError::NegativePriority {
                field: "start-priority",
                ..
            }
        ));
    }

    #[test]
    fn test_priority_above_java_int_is_rejected() {
        let max = i64::from(i32::MAX);
        let descriptor = DescriptorFields::new("ext", "1").priority(max).validate().unwrap();
        assert_eq!(descriptor.priority(), i32::MAX as u32);

        let err = DescriptorFields::new("ext", "1")
            .start_priority(max + 1)
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ValidationError::PriorityTooLarge {
                field: "start-priority",
                value: max + 1,
                max,
            }
        );
    }

    #[test]
    fn test_id_must_be_a_directory_name() {
        for id in ["a/b", "..", "c:\\ext"] {
            let err = DescriptorFields::new(id, "1").validate().unwrap_err();
            assert!(matches!(err, ValidationError::IllegalIdCharacter { .. }), "{}", id);
        }
    }

    #[test]
    fn test_name_defaults_to_id() {
        let descriptor = DescriptorFields::new("ext", "1").validate().unwrap();
        assert_eq!(descriptor.name(), "ext");
    }

    #[test]
    fn test_render_escapes_markup() {
        let xml = DescriptorFields::new("ext", "1.0")
            .name("Tom & <Jerry>")
            .priority(3)
            .validate()
            .unwrap()
            .render()
            .unwrap();

        assert!(xml.contains("<id>ext</id>"));
        assert!(xml.contains("<name>Tom &amp; &lt;Jerry&gt;</name>"));
        assert!(xml.contains("<priority>3</priority>"));
        assert!(xml.contains("<start-priority>0</start-priority>"));
    }

    #[test]
    fn test_rendered_xml_reads_back() {
        let descriptor = DescriptorFields::new("ext", "1.0")
            .name("Tom & Jerry")
            .author("Acme")
            .priority(10)
            .start_priority(20)
            .validate()
            .unwrap();
        let fields = DescriptorFields::from_xml(&descriptor.render().unwrap()).unwrap();
        assert_eq!(fields.validate().unwrap(), descriptor);
    }

    #[test]
    fn test_from_xml_rejects_bad_priority() {
        let xml = "<hivemq-extension><id>x</id><version>1</version><priority>high</priority></hivemq-extension>";
        assert!(matches!(
            DescriptorFields::from_xml(xml),
            Err(AssemblyError::MalformedDescriptor { .. })
        ));
    }

    #[test]
    fn test_read_from_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(DESCRIPTOR_FILE_NAME),
            "<?xml version=\"1.0\"?>\n<hivemq-extension>\n  <id>from-disk</id>\n  <version>3.1</version>\n  <name>From Disk</name>\n</hivemq-extension>\n",
        )
        .unwrap();
        let descriptor = ExtensionDescriptor::read_from_dir(dir.path()).unwrap();
        assert_eq!(descriptor.id(), "from-disk");
        assert_eq!(descriptor.name(), "From Disk");
        assert_eq!(descriptor.priority(), 0);

        let empty = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            ExtensionDescriptor::read_from_dir(empty.path()),
            Err(AssemblyError::Io { .. })
        ));
    }

    #[test]
    fn test_fields_from_descriptor_revalidate() {
        let descriptor = DescriptorFields::new("ext", "2").author("me").validate().unwrap();
        let fields: DescriptorFields = descriptor.clone().into();
        assert_eq!(fields.validate().unwrap(), descriptor);
    }
}

use anyhow::{Context, bail};
use mongodb::bson::{Bson, Document, oid::ObjectId};
use serde::{Deserialize, Deserializer, Serialize};
use validator::Validate;

/// A movie as exchanged over the API.
///
/// Only `id` and `title` are interpreted. Every other member is carried through to
/// storage and back unchanged.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct Movie {
    #[serde(default, skip_serializing_if = "Option::is_none", with = "hex_id")]
    pub id: Option<ObjectId>,
    #[serde(default, deserialize_with = "null_as_empty")]
    #[validate(length(min = 1, code = "required"))]
    pub title: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Movie {
    pub fn to_document(&self) -> anyhow::Result<Document> {
        let mut doc = Document::new();
        if let Some(id) = self.id {
            doc.insert("_id", id);
        }
        doc.insert("title", self.title.as_str());
        for (key, value) in &self.extra {
            if key == "_id" || key == "id" {
                continue;
            }
            let value = Bson::try_from(value.clone()).with_context(|| format!("field '{key}'"))?;
            doc.insert(key.as_str(), value);
        }
        Ok(doc)
    }

    pub fn from_document(mut doc: Document) -> anyhow::Result<Self> {
        let id = match doc.remove("_id") {
            Some(Bson::ObjectId(id)) => Some(id),
            Some(other) => bail!("_id has type {:?}, expected ObjectId", other.element_type()),
            None => None,
        };
        let title = match doc.remove("title") {
            Some(Bson::String(title)) => title,
            Some(Bson::Null) | None => String::new(),
            Some(other) => bail!("title has type {:?}, expected string", other.element_type()),
        };
        // `id` is the API name of `_id`, a stored field with that name would shadow it
        doc.remove("id");
        let extra = doc.into_iter().map(|(k, v)| (k, v.into_relaxed_extjson())).collect();

        Ok(Self { id, title, extra })
    }

    /// One message per violated field, sorted by field name.
    pub fn validation_messages(&self) -> Vec<String> {
        let Err(errors) = self.validate() else {
            return Vec::new();
        };
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| format!("field '{field}' failed '{}'", e.code))
            })
            .collect();
        messages.sort();
        messages
    }
}

#[cfg(test)]
impl Movie {
    pub fn titled(title: impl Into<String>) -> Self {
        Self { title: title.into(), ..Default::default() }
    }
}

/// Parses a 24-character hex identifier.
pub fn parse_movie_id(raw: &str) -> Option<ObjectId> {
    ObjectId::parse_str(raw).ok()
}

fn null_as_empty<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

mod hex_id {
    use mongodb::bson::oid::ObjectId;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(
        id: &Option<ObjectId>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match id {
            Some(id) => serializer.serialize_str(&id.to_hex()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<ObjectId>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.map(|s| ObjectId::parse_str(&s).map_err(D::Error::custom)).transpose()
    }
}

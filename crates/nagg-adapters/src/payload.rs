//! Typed provider response shapes. Only the fields the mappers read are modelled.

use nagg_core::Provider;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;

use crate::AdapterError;

#[derive(Debug, Clone, Deserialize)]
pub struct GuardianEnvelope {
    pub response: Option<GuardianResponse>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GuardianResponse {
    pub status: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub results: Vec<GuardianResult>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianResult {
    pub section_name: Option<String>,
    pub web_url: Option<String>,
    pub web_publication_date: Option<String>,
    #[serde(default)]
    pub fields: GuardianFields,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GuardianFields {
    pub headline: Option<String>,
    pub body: Option<String>,
    pub thumbnail: Option<String>,
    pub byline: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NytResponse {
    pub status: Option<String>,
    pub fault: Option<JsonValue>,
    #[serde(default)]
    pub results: Vec<NytStory>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NytStory {
    pub title: Option<String>,
    #[serde(rename = "abstract")]
    pub summary: Option<String>,
    pub url: Option<String>,
    pub byline: Option<String>,
    pub published_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_multimedia")]
    pub multimedia: Vec<NytMultimedia>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NytMultimedia {
    pub url: Option<String>,
}

/// Top Stories sends `multimedia` as an array, `null`, or `""` for stories without media.
fn lenient_multimedia<'de, D>(deserializer: D) -> Result<Vec<NytMultimedia>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = JsonValue::deserialize(deserializer)?;
    let JsonValue::Array(items) = value else {
        return Ok(Vec::new());
    };
    Ok(items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewsApiResponse {
    pub status: Option<String>,
    pub code: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub articles: Vec<NewsApiArticle>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsApiArticle {
    pub author: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub url_to_image: Option<String>,
    pub published_at: Option<String>,
    pub content: Option<String>,
}

/// One provider record, before mapping.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Guardian(GuardianResult),
    Nyt(NytStory),
    NewsApi(NewsApiArticle),
}

impl RawRecord {
    pub fn provider(&self) -> Provider {
        match self {
            RawRecord::Guardian(_) => Provider::Guardian,
            RawRecord::Nyt(_) => Provider::Nyt,
            RawRecord::NewsApi(_) => Provider::NewsApi,
        }
    }

    /// Provider-side title, for logging rejected records.
    pub fn raw_title(&self) -> Option<&str> {
        match self {
            RawRecord::Guardian(r) => r.fields.headline.as_deref(),
            RawRecord::Nyt(r) => r.title.as_deref(),
            RawRecord::NewsApi(r) => r.title.as_deref(),
        }
    }
}

/// Decodes a response body into records, surfacing provider-reported errors.
pub fn parse_payload(
    provider: Provider,
    category: &str,
    body: &[u8],
) -> Result<Vec<RawRecord>, AdapterError> {
    let decode_err = |source: serde_json::Error| AdapterError::Decode {
        provider,
        category: category.to_string(),
        source,
    };
    let status_err = |message: String| AdapterError::ProviderStatus {
        provider,
        category: category.to_string(),
        message,
    };

    match provider {
        Provider::Guardian => {
            let envelope: GuardianEnvelope = serde_json::from_slice(body).map_err(decode_err)?;
            let Some(response) = envelope.response else {
                return Err(status_err(
                    envelope.message.unwrap_or_else(|| "missing `response` object".to_string()),
                ));
            };
            if is_error_status(response.status.as_deref()) {
                return Err(status_err(response.message.unwrap_or_else(|| "error".to_string())));
            }
            Ok(response.results.into_iter().map(RawRecord::Guardian).collect())
        }
        Provider::Nyt => {
            let response: NytResponse = serde_json::from_slice(body).map_err(decode_err)?;
            if let Some(fault) = response.fault {
                return Err(status_err(fault.to_string()));
            }
            if is_error_status(response.status.as_deref()) {
                return Err(status_err("status ERROR".to_string()));
            }
            Ok(response.results.into_iter().map(RawRecord::Nyt).collect())
        }
        Provider::NewsApi => {
            let response: NewsApiResponse = serde_json::from_slice(body).map_err(decode_err)?;
            if is_error_status(response.status.as_deref()) {
                let code = response.code.unwrap_or_default();
                let message = response.message.unwrap_or_default();
                return Err(status_err(format!("{code}: {message}")));
            }
            Ok(response.articles.into_iter().map(RawRecord::NewsApi).collect())
        }
    }
}

fn is_error_status(status: Option<&str>) -> bool {
    status.is_some_and(|s| s.eq_ignore_ascii_case("error"))
}

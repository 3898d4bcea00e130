use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

/// POST body of `searchByCategories`.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SearchRequest<'a> {
    pub menu_category: bool,
    pub keywords: &'a str,
    pub pages: u32,
    pub size: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub distance: u32,
    pub depots: Vec<String>,
}

/// Response envelope. A missing `content` means there is nothing more to read.
///
/// Items stay raw until `into_listings`, so one undecodable item costs only
/// itself and not the page around it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub content: Option<Vec<Value>>,
}

impl SearchResponse {
    pub fn into_listings(self) -> Vec<RawListing> {
        self.content
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .filter_map(|(idx, item)| match serde_json::from_value::<RawListing>(item) {
                Ok(listing) => Some(listing),
                Err(e) => {
                    warn!(index = idx, error = %e, "skipping undecodable listing");
                    None
                }
            })
            .collect()
    }
}

/// One product as returned upstream, with its per-branch prices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawListing {
    /// Usually a string; tolerated as a number.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub brand: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image_url: Option<String>,
    #[serde(default, deserialize_with = "lenient_depots")]
    pub product_depot_info_list: Option<Vec<RawDepot>>,
}

impl RawListing {
    /// Stable upstream identifier, if present and non-blank.
    pub fn product_id(&self) -> Option<String> {
        self.id.as_ref().and_then(scalar_to_string)
    }

    pub fn depots(&self) -> &[RawDepot] {
        self.product_depot_info_list.as_deref().unwrap_or(&[])
    }
}

/// One branch's price entry for a listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawDepot {
    #[serde(rename = "marketAdi", default, deserialize_with = "lenient_string")]
    pub market_name: Option<String>,
    #[serde(rename = "depotName", default, deserialize_with = "lenient_string")]
    pub depot_name: Option<String>,
    /// Number or numeric string, depending on the upstream's mood.
    #[serde(default)]
    pub price: Option<Value>,
    #[serde(rename = "unitPrice", default)]
    pub unit_price: Option<Value>,
}

pub(crate) fn scalar_to_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => {
            let t = s.trim();
            (!t.is_empty()).then(|| t.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// Any scalar becomes text; arrays, objects and null read as absent.
fn lenient_string<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Value>::deserialize(de)?
        .as_ref()
        .and_then(scalar_to_string))
}

// A non-array reads as no depots; depot entries that fail to decode are dropped.
fn lenient_depots<'de, D>(de: D) -> Result<Option<Vec<RawDepot>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(Value::Array(items)) = Option::<Value>::deserialize(de)? else {
        return Ok(None);
    };
    Ok(Some(
        items
            .into_iter()
            .filter_map(|d| serde_json::from_value(d).ok())
            .collect(),
    ))
}

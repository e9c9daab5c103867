// Order event entity and its canonical JSON codec
use std::fmt;

use chrono::{DateTime, FixedOffset, Offset, Utc};
use rust_decimal::Decimal;
use serde::de::{self, IgnoredAny, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::error::{EventBusError, Result};

/// Canonical wire names, in encode order
pub const FIELD_NAMES: [&str; 4] = ["id", "customerId", "amount", "createdAt"];

/// `0001-01-01T00:00:00Z`, the "no value supplied" timestamp
const UNSET_CREATED_AT_SECS: i64 = -62_135_596_800;

/// An order placed by a customer.
///
/// Publish and consume paths each work on their own copy; nothing mutates a
/// value after it has been handed to the codec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderEvent {
    /// Unique across all published events. Generated on publish when absent.
    pub id: Option<Uuid>,
    pub customer_id: Option<String>,
    /// Written as a JSON number with every digit kept
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    pub created_at: DateTime<FixedOffset>,
}

/// The zero sentinel for `created_at`
pub fn unset_created_at() -> DateTime<FixedOffset> {
    DateTime::<Utc>::from_timestamp(UNSET_CREATED_AT_SECS, 0)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
        .with_timezone(&Utc.fix())
}

/// Current wall-clock time with a UTC offset
pub fn now_with_offset() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&Utc.fix())
}

impl OrderEvent {
    pub fn new(customer_id: impl Into<String>, amount: Decimal) -> Self {
        Self {
            id: None,
            customer_id: Some(customer_id.into()),
            amount,
            created_at: unset_created_at(),
        }
    }

    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<FixedOffset>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Whether the caller supplied a real creation time
    pub fn has_created_at(&self) -> bool {
        self.created_at != unset_created_at()
    }

    /// Fill defaulted fields: a fresh id when absent, `now` when the
    /// creation time is the zero sentinel. Returns the final id.
    pub fn normalized(self, now: DateTime<FixedOffset>) -> (Uuid, Self) {
        let id = self.id.unwrap_or_else(Uuid::new_v4);
        let created_at = if self.has_created_at() {
            self.created_at
        } else {
            now
        };

        (
            id,
            Self {
                id: Some(id),
                created_at,
                ..self
            },
        )
    }
}

impl Default for OrderEvent {
    fn default() -> Self {
        Self {
            id: None,
            customer_id: None,
            amount: Decimal::ZERO,
            created_at: unset_created_at(),
        }
    }
}

/// Serialize to the canonical JSON object. Every field is written, `id` as
/// `null` when unset.
pub fn encode_order_event(event: &OrderEvent) -> Result<Vec<u8>> {
    serde_json::to_vec(event).map_err(EventBusError::Encode)
}

/// Parse a JSON body, matching property names case-insensitively.
///
/// Missing fields take their defaults; only malformed JSON, incompatible
/// field types or a property given twice are errors.
pub fn decode_order_event(body: &[u8]) -> Result<OrderEvent> {
    serde_json::from_slice(body).map_err(EventBusError::Decode)
}

#[derive(Deserialize)]
struct WireAmount(#[serde(with = "rust_decimal::serde::arbitrary_precision")] Decimal);

impl<'de> Deserialize<'de> for OrderEvent {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderEventVisitor;

        impl<'de> Visitor<'de> for OrderEventVisitor {
            type Value = OrderEvent;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an order event object")
            }

            fn visit_map<M>(self, mut map: M) -> std::result::Result<OrderEvent, M::Error>
            where
                M: MapAccess<'de>,
            {
                let mut id: Option<Option<Uuid>> = None;
                let mut customer_id: Option<Option<String>> = None;
                let mut amount: Option<Decimal> = None;
                let mut created_at: Option<DateTime<FixedOffset>> = None;

                while let Some(name) = map.next_key::<String>()? {
                    let Some(field) = FIELD_NAMES
                        .iter()
                        .copied()
                        .find(|known| known.eq_ignore_ascii_case(&name))
                    else {
                        map.next_value::<IgnoredAny>()?;
                        continue;
                    };

                    let seen = match field {
                        "id" => id.replace(map.next_value()?).is_some(),
                        "customerId" => customer_id.replace(map.next_value()?).is_some(),
                        "amount" => amount
                            .replace(map.next_value::<WireAmount>()?.0)
                            .is_some(),
                        _ => created_at.replace(map.next_value()?).is_some(),
                    };
                    if seen {
                        return Err(de::Error::custom(format!(
                            "property `{field}` given more than once"
                        )));
                    }
                }

                Ok(OrderEvent {
                    id: id.flatten(),
                    customer_id: customer_id.flatten(),
                    amount: amount.unwrap_or_default(),
                    created_at: created_at.unwrap_or_else(unset_created_at),
                })
            }
        }

        deserializer.deserialize_map(OrderEventVisitor)
    }
}

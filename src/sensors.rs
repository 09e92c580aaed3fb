//! Read-only sensor projection of the poll state
//!
//! Sensors are plain table rows: an id, a unit, a category and a source
//! rule. `project` walks the table and renders every row against a `State`.

use crate::mapper::Locale;
use crate::models::{NormalizedPayload, State};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Primary,
    Diagnostic,
}

/// Rendered value of a sensor
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Text(String),
    Number(f64),
    Integer(i64),
}

impl SensorValue {
    fn text(s: impl Into<String>) -> Self {
        SensorValue::Text(s.into())
    }
}

/// Where a sensor takes its value from
#[derive(Clone, Copy)]
enum Source {
    /// OK/ERROR with the error tag as attribute
    Status,
    /// Time of the last poll attempt
    LastUpdate,
    /// A payload field; no payload means no value
    Field(fn(&NormalizedPayload) -> Option<SensorValue>),
    /// Days until the subscription ends, as words
    DayCount,
    /// Payment history in the attributes
    Payments,
}

#[derive(Clone, Copy)]
pub struct SensorDescriptor {
    pub id: &'static str,
    pub unit: Option<&'static str>,
    /// Decimal places to show, for numeric sensors
    pub precision: Option<usize>,
    pub category: Category,
    source: Source,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub id: &'static str,
    pub value: Option<SensorValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<&'static str>,
    pub category: Category,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    precision: Option<usize>,
}

impl SensorReading {
    /// Value with unit, as shown to a person
    pub fn display(&self) -> String {
        let value = match &self.value {
            None => return "-".to_string(),
            Some(SensorValue::Text(s)) => s.clone(),
            Some(SensorValue::Integer(n)) => n.to_string(),
            Some(SensorValue::Number(n)) => match self.precision {
                Some(p) => format!("{:.*}", p, n),
                None => n.to_string(),
            },
        };
        match self.unit {
            Some(unit) => format!("{} {}", value, unit),
            None => value,
        }
    }
}

const fn sensor(id: &'static str, source: Source) -> SensorDescriptor {
    SensorDescriptor {
        id,
        unit: None,
        precision: None,
        category: Category::Primary,
        source,
    }
}

const fn money_sensor(id: &'static str, unit: &'static str, source: Source) -> SensorDescriptor {
    SensorDescriptor {
        id,
        unit: Some(unit),
        precision: Some(2),
        category: Category::Primary,
        source,
    }
}

const fn diagnostic(id: &'static str, source: Source) -> SensorDescriptor {
    SensorDescriptor {
        id,
        unit: None,
        precision: None,
        category: Category::Diagnostic,
        source,
    }
}

fn text(value: &Option<String>) -> Option<SensorValue> {
    value.as_ref().map(|s| SensorValue::Text(s.clone()))
}

fn number(value: Option<f64>) -> Option<SensorValue> {
    value.map(SensorValue::Number)
}

pub static SENSORS: &[SensorDescriptor] = &[
    sensor("status", Source::Status),
    sensor("account", Source::Field(|p| text(&p.account))),
    money_sensor("balance", "RUB", Source::Field(|p| number(p.balance))),
    sensor("subscriber", Source::Field(|p| text(&p.subscriber))),
    sensor("address", Source::Field(|p| Some(SensorValue::text(p.address.clone())))),
    diagnostic("ip", Source::Field(|p| Some(SensorValue::text(p.net.ip.clone())))),
    diagnostic("mac", Source::Field(|p| Some(SensorValue::text(p.net.mac.clone())))),
    diagnostic("vlan", Source::Field(|p| Some(SensorValue::text(p.net.vlan.clone())))),
    sensor("tariff_name", Source::Field(|p| text(&p.tariff.name))),
    sensor("tariff_speed", Source::Field(|p| text(&p.tariff.speed))),
    money_sensor("tariff_amount", "₽", Source::Field(|p| number(p.tariff.amount))),
    sensor("tariff_period", Source::Field(|p| text(&p.tariff.period))),
    sensor("tariff_end", Source::DayCount),
    money_sensor(
        "tariff_pay_left",
        "₽",
        Source::Field(|p| number(p.tariff.pay_subscribe)),
    ),
    sensor("pays", Source::Payments),
    sensor("last_update", Source::LastUpdate),
];

/// Render every sensor in the table against `state`
pub fn project(state: &State, locale: Locale) -> Vec<SensorReading> {
    SENSORS.iter().map(|d| read(d, state, locale)).collect()
}

fn read(descriptor: &SensorDescriptor, state: &State, locale: Locale) -> SensorReading {
    let mut attributes = BTreeMap::new();
    let payload = state.data.as_ref();

    let value = match descriptor.source {
        Source::Status => {
            let error = match (&state.error, state.last_attempt) {
                (Some(e), _) => Some(e.clone()),
                (None, None) => Some("no_state".to_string()),
                (None, Some(_)) => None,
            };
            let status = if error.is_some() { "ERROR" } else { "OK" };
            attributes.insert("error".to_string(), serde_json::json!(error));
            Some(SensorValue::text(status))
        }
        Source::LastUpdate => state
            .last_attempt
            .map(|t| SensorValue::Text(t.to_rfc3339())),
        Source::Field(get) => payload.and_then(get),
        Source::DayCount => payload.and_then(|p| {
            attributes.insert(
                "scheduled_end".to_string(),
                serde_json::json!(p.tariff.end_subscribe),
            );
            p.tariff
                .end_days
                .map(|days| SensorValue::Text(describe_days(days, locale)))
        }),
        Source::Payments => payload.map(|p| {
            attributes.insert("pays".to_string(), serde_json::json!(p.pays));
            SensorValue::Integer(p.pays.len() as i64)
        }),
    };

    SensorReading {
        id: descriptor.id,
        value,
        unit: descriptor.unit,
        category: descriptor.category,
        attributes,
        precision: descriptor.precision,
    }
}

/// Human wording of the days left until the subscription ends
pub fn describe_days(days: i64, locale: Locale) -> String {
    match (locale, days) {
        (Locale::Ru, d) if d < 0 => "просрочено".to_string(),
        (Locale::En, d) if d < 0 => "overdue".to_string(),
        (Locale::Ru, 0) => "сегодня".to_string(),
        (Locale::En, 0) => "today".to_string(),
        (Locale::Ru, 1) => "завтра".to_string(),
        (Locale::En, 1) => "tomorrow".to_string(),
        (Locale::Ru, n) => plural_days_ru(n),
        (Locale::En, n) => format!("{} days", n),
    }
}

fn plural_days_ru(n: i64) -> String {
    let last = n % 10;
    let last2 = n % 100;
    let word = if last == 1 && last2 != 11 {
        "день"
    } else if (2..=4).contains(&last) && !(12..=14).contains(&last2) {
        "дня"
    } else {
        "дней"
    };
    format!("{} {}", n, word)
}

//! Payload mapper: raw portal JSON to a flat `NormalizedPayload`
//!
//! Everything here is pure. Locale, time zone and the current instant come
//! in through `MapContext`, so derived fields (`end_days`, `pay_subscribe`,
//! localized strings) are recomputed from source fields on every cycle.

use crate::models::{NetInfo, NormalizedPayload, Payment, Tariff};
use chrono::{DateTime, FixedOffset, Local, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;
use serde_json::Value;

const ADDR_VLAN: &str = "5006";
const ADDR_MAC: &str = "4006";
const ADDR_IP: &str = "3006";
const ADDR_STREET: &str = "1006";

const DEFAULT_VLAN: &str = "0";
const DEFAULT_IP: &str = "0.0.0.0";
const DEFAULT_MAC: &str = "00:00:00:00:00:00";

const HUMAN_FORMAT: &str = "%d.%m.%Y, %H:%M";

/// Display language for derived strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    Ru,
    #[default]
    En,
}

impl Locale {
    /// Any tag starting with `ru` selects Russian, everything else English
    pub fn from_tag(tag: &str) -> Self {
        if tag.trim().to_lowercase().starts_with("ru") {
            Locale::Ru
        } else {
            Locale::En
        }
    }

    pub fn unknown(self) -> &'static str {
        match self {
            Locale::Ru => "Неизвестно",
            Locale::En => "Unknown",
        }
    }

    fn period(self, raw: &str) -> String {
        let code = raw.to_lowercase();
        let text = match (self, code.as_str()) {
            (Locale::Ru, "y") => "год",
            (Locale::Ru, "m") => "месяц",
            (Locale::En, "y") => "year",
            (Locale::En, "m") => "month",
            _ => return code,
        };
        text.to_string()
    }

    fn speed_unit(self, raw: &str) -> String {
        match raw.to_lowercase().as_str() {
            "мбит/с" | "mbps" | "мбитс" => match self {
                Locale::Ru => "Мбит/с".to_string(),
                Locale::En => "Mbps".to_string(),
            },
            _ => raw.to_string(),
        }
    }
}

/// Time zone used to render timestamps and count calendar days
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Zone {
    #[default]
    System,
    Named(Tz),
}

impl Zone {
    pub fn from_name(name: &str) -> Result<Self, String> {
        name.parse::<Tz>()
            .map(Zone::Named)
            .map_err(|e| format!("unknown time zone '{}': {}", name, e))
    }

    fn localize(self, dt: &DateTime<FixedOffset>) -> NaiveDateTime {
        match self {
            Zone::System => dt.with_timezone(&Local).naive_local(),
            Zone::Named(tz) => dt.with_timezone(&tz).naive_local(),
        }
    }

    fn today(self, now: DateTime<Utc>) -> NaiveDate {
        self.localize(&now.fixed_offset()).date()
    }
}

/// Inputs of a mapping call besides the payload itself
#[derive(Debug, Clone, Copy)]
pub struct MapContext {
    pub locale: Locale,
    pub zone: Zone,
    pub now: DateTime<Utc>,
}

impl MapContext {
    pub fn current(locale: Locale, zone: Zone) -> Self {
        Self {
            locale,
            zone,
            now: Utc::now(),
        }
    }
}

/// Map the `data` member of the portal payload
pub fn map_payload(data: &Value, ctx: &MapContext) -> NormalizedPayload {
    let unknown = ctx.locale.unknown();

    let mut vlan = DEFAULT_VLAN.to_string();
    let mut ip = DEFAULT_IP.to_string();
    let mut mac = DEFAULT_MAC.to_string();
    let mut address = unknown.to_string();

    for addr in list(data, "equipment_addresses") {
        let Some(kind) = addr.get("n_addr_type_id").and_then(value_to_string) else {
            continue;
        };
        let code = addr.get("vc_code").and_then(value_to_string);
        match kind.as_str() {
            ADDR_VLAN => vlan = code.unwrap_or(vlan),
            ADDR_MAC => mac = code.as_deref().and_then(normalize_mac).unwrap_or(mac),
            ADDR_IP => ip = code.unwrap_or(ip),
            ADDR_STREET => {
                address = code
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| unknown.to_string())
            }
            _ => {}
        }
    }

    let pays = list(data, "activities")
        .map(|p| Payment {
            date: p.get("d_oper").and_then(Value::as_str).and_then(|s| to_human(s, ctx.zone)),
            amount: money(p.get("n_value_1")),
        })
        .collect();

    let serv = list(data, "servs").next();
    let serv_field = |key: &str| serv.and_then(|s| s.get(key));
    let account_rec = list(data, "personal_accounts").next();

    let balance = money(account_rec.and_then(|a| a.get("n_sum_bal")));
    let amount = money(serv_field("n_good_base_sum"));
    let end_iso = serv_field("d_charge_log_end").and_then(Value::as_str);

    NormalizedPayload {
        account: account_rec
            .and_then(|a| a.get("vc_account"))
            .and_then(value_to_string),
        balance,
        subscriber: data
            .get("person")
            .and_then(|p| p.get("vc_name"))
            .and_then(value_to_string),
        address,
        net: NetInfo { ip, mac, vlan },
        tariff: Tariff {
            name: serv_field("vc_name").and_then(value_to_string),
            speed: speed(serv_field("detailed_info"), ctx.locale),
            amount,
            period: serv_field("c_period")
                .and_then(value_to_string)
                .filter(|p| !p.is_empty())
                .map(|p| ctx.locale.period(&p)),
            end_subscribe: end_iso.and_then(|s| to_human(s, ctx.zone)),
            end_days: end_iso.and_then(|s| days_until(s, ctx.zone, ctx.now)),
            pay_subscribe: pay_left(amount, balance),
        },
        pays,
    }
}

fn list<'a>(data: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    data.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn speed(info: Option<&Value>, locale: Locale) -> Option<String> {
    let info = info?;
    let value = info.get("n_speed_volume_cur").and_then(value_to_string)?;
    match info
        .get("vc_speed_unit_cur")
        .and_then(value_to_string)
        .filter(|u| !u.is_empty())
    {
        Some(unit) => Some(format!("{} {}", value, locale.speed_unit(&unit))),
        None => Some(value),
    }
}

/// Amount still needed to cover the next charge, never negative
pub fn pay_left(amount: Option<f64>, balance: Option<f64>) -> Option<f64> {
    Some(round2(amount? - balance?).max(0.0))
}

/// Truthiness of a JSON value the way the portal's error fields are checked
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Scalar JSON rendered as a plain string; `null` is absent
pub fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Monetary value from a number or numeric string, rounded to kopecks
pub fn money(value: Option<&Value>) -> Option<f64> {
    let raw = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    raw.is_finite().then(|| round2(raw))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lower-case colon-separated MAC; `-` and spaces count as separators
pub fn normalize_mac(raw: &str) -> Option<String> {
    let mac = raw
        .split(|c: char| c == '-' || c == ':' || c.is_whitespace())
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(":")
        .to_lowercase();
    (!mac.is_empty()).then_some(mac)
}

/// Parse a portal timestamp into wall-clock time of `zone`.
/// Timestamps without an offset are already local.
fn parse_local(raw: &str, zone: Zone) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(zone.localize(&dt));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(zone.localize(&dt));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive);
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
}

/// `DD.MM.YYYY, HH:MM` in the given zone, or `None` for unparsable input
pub fn to_human(raw: &str, zone: Zone) -> Option<String> {
    parse_local(raw, zone).map(|dt| dt.format(HUMAN_FORMAT).to_string())
}

/// Calendar days from today to the timestamp's local date
pub fn days_until(raw: &str, zone: Zone, now: DateTime<Utc>) -> Option<i64> {
    let target = parse_local(raw, zone)?.date();
    Some((target - zone.today(now)).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn ctx(locale: Locale) -> MapContext {
        MapContext {
            locale,
            zone: Zone::Named(Tz::UTC),
            now: Utc.with_ymd_and_hms(2025, 1, 10, 12, 0, 0).unwrap(),
        }
    }

    fn sample() -> Value {
        json!({
            "personal_accounts": [{"vc_account": "A1", "n_sum_bal": "150.5"}],
            "servs": [{
                "vc_name": "Basic",
                "n_good_base_sum": "300",
                "c_period": "m",
                "detailed_info": {"n_speed_volume_cur": 100, "vc_speed_unit_cur": "Mbps"},
                "d_charge_log_end": "2025-01-15T00:00:00Z"
            }],
            "equipment_addresses": [{"n_addr_type_id": "4006", "vc_code": "AA-BB-CC-DD-EE-FF"}]
        })
    }

    #[test]
    fn test_map_sample_payload() {
        let payload = map_payload(&sample(), &ctx(Locale::En));

        assert_eq!(payload.account.as_deref(), Some("A1"));
        assert_eq!(payload.balance, Some(150.5));
        assert_eq!(payload.net.mac, "aa:bb:cc:dd:ee:ff");
        assert_eq!(payload.net.ip, DEFAULT_IP);
        assert_eq!(payload.net.vlan, DEFAULT_VLAN);
        assert_eq!(payload.address, "Unknown");
        assert_eq!(payload.subscriber, None);

        let t = &payload.tariff;
        assert_eq!(t.name.as_deref(), Some("Basic"));
        assert_eq!(t.speed.as_deref(), Some("100 Mbps"));
        assert_eq!(t.amount, Some(300.0));
        assert_eq!(t.period.as_deref(), Some("month"));
        assert_eq!(t.end_subscribe.as_deref(), Some("15.01.2025, 00:00"));
        assert_eq!(t.end_days, Some(5));
        assert_eq!(t.pay_subscribe, Some(149.5));
        assert!(payload.pays.is_empty());
    }

    #[test]
    fn test_map_russian_locale() {
        let payload = map_payload(&sample(), &ctx(Locale::Ru));

        assert_eq!(payload.address, "Неизвестно");
        assert_eq!(payload.tariff.period.as_deref(), Some("месяц"));
        assert_eq!(payload.tariff.speed.as_deref(), Some("100 Мбит/с"));
    }

    #[test]
    fn test_map_empty_payload_uses_defaults() {
        let payload = map_payload(&json!({}), &ctx(Locale::En));

        assert_eq!(payload.account, None);
        assert_eq!(payload.balance, None);
        assert_eq!(payload.net.ip, "0.0.0.0");
        assert_eq!(payload.net.mac, "00:00:00:00:00:00");
        assert_eq!(payload.net.vlan, "0");
        assert_eq!(payload.tariff.name, None);
        assert_eq!(payload.tariff.speed, None);
        assert_eq!(payload.tariff.period, None);
        assert_eq!(payload.tariff.end_days, None);
        assert_eq!(payload.tariff.pay_subscribe, None);
    }

    #[test]
    fn test_map_equipment_addresses() {
        let data = json!({
            "equipment_addresses": [
                {"n_addr_type_id": 5006, "vc_code": "412"},
                {"n_addr_type_id": "3006", "vc_code": "10.1.2.3"},
                {"n_addr_type_id": "1006", "vc_code": "ул. Ленина, 1"},
                {"n_addr_type_id": "4006", "vc_code": null},
                {"n_addr_type_id": "9999", "vc_code": "ignored"}
            ],
            "person": {"vc_name": "Иванов И.И."}
        });
        let payload = map_payload(&data, &ctx(Locale::En));

        assert_eq!(payload.net.vlan, "412");
        assert_eq!(payload.net.ip, "10.1.2.3");
        assert_eq!(payload.net.mac, DEFAULT_MAC);
        assert_eq!(payload.address, "ул. Ленина, 1");
        assert_eq!(payload.subscriber.as_deref(), Some("Иванов И.И."));
    }

    #[test]
    fn test_map_activities_keep_order() {
        let data = json!({
            "activities": [
                {"d_oper": "2024-12-01T10:15:00Z", "n_value_1": 500},
                {"d_oper": "garbage", "n_value_1": "299.999"},
                {"n_value_1": null}
            ]
        });
        let payload = map_payload(&data, &ctx(Locale::En));

        assert_eq!(
            payload.pays,
            vec![
                Payment {
                    date: Some("01.12.2024, 10:15".to_string()),
                    amount: Some(500.0)
                },
                Payment {
                    date: None,
                    amount: Some(300.0)
                },
                Payment {
                    date: None,
                    amount: None
                },
            ]
        );
    }

    #[test]
    fn test_normalize_mac() {
        assert_eq!(normalize_mac("AA-BB-CC-DD-EE-FF").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(normalize_mac("aa bb cc dd ee ff").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(normalize_mac(" AA:BB:CC:DD:EE:FF ").as_deref(), Some("aa:bb:cc:dd:ee:ff"));
        assert_eq!(normalize_mac("  "), None);
    }

    #[test]
    fn test_pay_left() {
        assert_eq!(pay_left(Some(300.0), Some(150.5)), Some(149.5));
        assert_eq!(pay_left(Some(300.0), Some(450.0)), Some(0.0));
        assert_eq!(pay_left(Some(0.3), Some(0.1)), Some(0.2));
        assert_eq!(pay_left(None, Some(1.0)), None);
        assert_eq!(pay_left(Some(1.0), None), None);
    }

    #[test]
    fn test_money() {
        assert_eq!(money(Some(&json!("150.5"))), Some(150.5));
        assert_eq!(money(Some(&json!(12.346))), Some(12.35));
        assert_eq!(money(Some(&json!("n/a"))), None);
        assert_eq!(money(Some(&json!(null))), None);
        assert_eq!(money(None), None);
    }

    #[test]
    fn test_human_dates_follow_zone() {
        let moscow = Zone::from_name("Europe/Moscow").unwrap();
        assert_eq!(
            to_human("2025-01-15T00:00:00Z", moscow).as_deref(),
            Some("15.01.2025, 03:00")
        );
        assert_eq!(
            to_human("2025-01-15T00:00:00+03:00", Zone::Named(Tz::UTC)).as_deref(),
            Some("14.01.2025, 21:00")
        );
        assert_eq!(
            to_human("2025-01-15 08:30:00", moscow).as_deref(),
            Some("15.01.2025, 08:30")
        );
        assert_eq!(to_human("", moscow), None);
        assert_eq!(to_human("15/01/2025", moscow), None);
    }

    #[test]
    fn test_days_until_uses_calendar_dates() {
        let now = Utc.with_ymd_and_hms(2025, 1, 10, 23, 30, 0).unwrap();
        let utc = Zone::Named(Tz::UTC);

        assert_eq!(days_until("2025-01-11T00:10:00Z", utc, now), Some(1));
        assert_eq!(days_until("2025-01-10T00:00:00Z", utc, now), Some(0));
        assert_eq!(days_until("2025-01-09T23:59:00Z", utc, now), Some(-1));

        // 23:30 UTC is already the 11th in Moscow
        let moscow = Zone::from_name("Europe/Moscow").unwrap();
        assert_eq!(days_until("2025-01-11T12:00:00Z", moscow, now), Some(0));
        assert_eq!(days_until("not a date", moscow, now), None);
    }

    #[test]
    fn test_locale_from_tag() {
        assert_eq!(Locale::from_tag("ru"), Locale::Ru);
        assert_eq!(Locale::from_tag("ru-RU"), Locale::Ru);
        assert_eq!(Locale::from_tag("RU"), Locale::Ru);
        assert_eq!(Locale::from_tag("en"), Locale::En);
        assert_eq!(Locale::from_tag(""), Locale::En);
    }

    #[test]
    fn test_period_passthrough() {
        assert_eq!(Locale::En.period("Y"), "year");
        assert_eq!(Locale::Ru.period("y"), "год");
        assert_eq!(Locale::En.period("d"), "d");
    }

    #[test]
    fn test_is_truthy() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!(false)));
        assert!(is_truthy(&json!("unauthorized")));
        assert!(is_truthy(&json!(1)));
    }
}

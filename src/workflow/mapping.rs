//! `formData` → typed record mapping with field-level validation.
//!
//! Builders collect every field error before failing so the operator sees the
//! whole picture in one response.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::errors::{FieldError, ValidationReport};
use crate::identity::Creator;
use crate::models::record::{
    InsuranceRecord, LoanRecord, NewTicket, RecordStatus, TicketPriority,
};
use crate::models::staging::StagingDocument;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static regex"));

pub const LOAN_TYPES: &[&str] = &[
    "Personal",
    "Home",
    "Business",
    "Education",
    "Gold",
    "Machinery",
    "Solar",
    "Property",
    "Life Insurance",
    "Health Insurance",
    "General Insurance",
];

pub const INSURANCE_TYPES: &[&str] = &[
    "Life Insurance",
    "Health Insurance",
    "General Insurance",
    "All Insurance",
];

const MAX_NAME_LEN: usize = 100;
const MAX_SUBJECT_LEN: usize = 200;
const MAX_EMAIL_LEN: usize = 320;
const MAX_PHONE_LEN: usize = 32;
const MAX_CITY_STATE_LEN: usize = 200;
const MAX_SHORT_TEXT_LEN: usize = 64;
/// `NUMERIC(16,2)`: 14 integer digits, 2 decimals.
const MAX_AMOUNT_SCALE: u32 = 2;
static MAX_AMOUNT: Lazy<Decimal> = Lazy::new(|| Decimal::from(100_000_000_000_000i64));

/// Keys lifted into typed columns; everything else lands in `details`.
const LOAN_CORE_KEYS: &[&str] = &[
    "fullName", "email", "phone", "cityState", "loanType", "loanAmount", "tenure", "consent",
];
const INSURANCE_CORE_KEYS: &[&str] = &[
    "fullName", "email", "phone", "age", "insuranceType", "coverageAmount",
];
/// Client-supplied keys that must never override workflow-controlled values.
const RESERVED_KEYS: &[&str] = &[
    "userId", "status", "adminNotes", "approvedAt", "approvedBy", "createdBy", "createdById",
    "createdAt", "_id", "id",
];

/// Values substituted for required fields a client may omit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDefaults {
    /// `None` makes a missing `consent` a validation error.
    pub consent: Option<bool>,
}

impl Default for FieldDefaults {
    fn default() -> Self {
        Self {
            consent: Some(true),
        }
    }
}

/// Approval metadata shared by loan and insurance records.
#[derive(Debug, Clone)]
pub struct Approval<'a> {
    pub creator: &'a Creator,
    pub approved_by: &'a str,
    pub admin_notes: &'a str,
    pub now: DateTime<Utc>,
}

struct Fields<'a> {
    form: &'a Map<String, Value>,
    errors: Vec<FieldError>,
}

impl<'a> Fields<'a> {
    fn new(form: &'a Map<String, Value>) -> Self {
        Self {
            form,
            errors: Vec::new(),
        }
    }

    /// Trimmed, non-empty text. Numbers are accepted and stringified (phone numbers).
    fn text(&self, key: &str) -> Option<String> {
        match self.form.get(key)? {
            Value::String(s) => {
                let t = s.trim();
                (!t.is_empty()).then(|| t.to_string())
            }
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn required_text(&mut self, key: &str, label: &str) -> String {
        match self.text(key) {
            Some(v) => v,
            None => {
                self.errors
                    .push(FieldError::new(key, format!("{label} is required")));
                String::new()
            }
        }
    }

    fn check_len(&mut self, key: &str, label: &str, value: &str, max: usize) {
        if value.chars().count() > max {
            self.errors.push(FieldError::new(
                key,
                format!("{label} must be at most {max} characters"),
            ));
        }
    }

    fn bounded_text(&mut self, key: &str, label: &str, max: usize) -> String {
        let v = self.required_text(key, label);
        self.check_len(key, label, &v, max);
        v
    }

    fn optional_bounded_text(&mut self, key: &str, label: &str, max: usize) -> Option<String> {
        let v = self.text(key)?;
        self.check_len(key, label, &v, max);
        Some(v)
    }

    fn email(&mut self) -> String {
        let v = self.required_text("email", "Email").to_lowercase();
        self.check_len("email", "Email", &v, MAX_EMAIL_LEN);
        if !v.is_empty() && !EMAIL_RE.is_match(&v) {
            self.errors
                .push(FieldError::new("email", "Please enter a valid email"));
        }
        v
    }

    fn one_of(&mut self, key: &str, label: &str, allowed: &[&str]) -> String {
        let v = self.required_text(key, label);
        if !v.is_empty() && !allowed.contains(&v.as_str()) {
            self.errors.push(FieldError::new(
                key,
                format!("`{v}` is not a valid {}", label.to_lowercase()),
            ));
        }
        v
    }

    fn fail(&mut self, key: &str, message: impl Into<String>) {
        self.errors.push(FieldError::new(key, message));
    }

    /// Required, non-negative amount that fits the record column.
    fn amount(&mut self, key: &str, label: &str) -> Decimal {
        let amount = match self.form.get(key) {
            None | Some(Value::Null) => {
                self.fail(key, format!("{label} is required"));
                return Decimal::ZERO;
            }
            Some(v) => match parse_amount(v) {
                Some(a) => a,
                None => {
                    self.fail(key, format!("{label} must be a non-negative number"));
                    return Decimal::ZERO;
                }
            },
        };
        if amount >= *MAX_AMOUNT {
            self.fail(key, format!("{label} must be less than {}", *MAX_AMOUNT));
        } else if amount.normalize().scale() > MAX_AMOUNT_SCALE {
            self.fail(
                key,
                format!("{label} can have at most {MAX_AMOUNT_SCALE} decimal places"),
            );
        }
        amount
    }

    fn finish<T>(self, value: T, preview: Value) -> Result<T, ValidationReport> {
        if self.errors.is_empty() {
            Ok(value)
        } else {
            Err(ValidationReport {
                errors: self.errors,
                preview,
            })
        }
    }
}

/// Accepts JSON numbers and numeric strings such as `"5,00,000"` or `"₹ 250000"`.
pub fn parse_amount(value: &Value) -> Option<Decimal> {
    let amount = match value {
        Value::Number(n) => {
            let s = n.to_string();
            Decimal::from_str(&s)
                .or_else(|_| Decimal::from_scientific(&s))
                .ok()?
        }
        Value::String(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| !c.is_whitespace() && *c != ',' && *c != '₹')
                .collect();
            if cleaned.is_empty() {
                return None;
            }
            Decimal::from_str(&cleaned).ok()?
        }
        _ => return None,
    };
    (!amount.is_sign_negative()).then_some(amount)
}

fn parse_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn parse_age(value: &Value) -> Result<Option<i32>, ()> {
    let n = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.trim().is_empty() => return Ok(None),
        Value::String(s) => s.trim().parse::<i64>().map_err(|_| ())?,
        Value::Number(n) => n.as_i64().ok_or(())?,
        _ => return Err(()),
    };
    if (18..=100).contains(&n) {
        Ok(Some(n as i32))
    } else {
        Err(())
    }
}

fn details(form: &Map<String, Value>, core: &[&str]) -> Value {
    let rest: Map<String, Value> = form
        .iter()
        .filter(|(k, _)| !core.contains(&k.as_str()) && !RESERVED_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(rest)
}

/// The subset of attempted values worth showing an operator.
fn preview(form: &Map<String, Value>, keys: &[&str], creator: Option<&Creator>) -> Value {
    let mut out = Map::new();
    for key in keys {
        out.insert(
            (*key).to_string(),
            form.get(*key).cloned().unwrap_or(Value::Null),
        );
    }
    if let Some(c) = creator {
        out.insert("createdById".into(), json!(c.user_id));
        out.insert("createdBy".into(), json!(c.kind));
    }
    Value::Object(out)
}

fn empty_form() -> &'static Map<String, Value> {
    static EMPTY: Lazy<Map<String, Value>> = Lazy::new(Map::new);
    &EMPTY
}

pub fn build_loan(
    doc: &StagingDocument,
    approval: &Approval<'_>,
    defaults: FieldDefaults,
) -> Result<LoanRecord, ValidationReport> {
    let form = doc.form_object().unwrap_or_else(|| empty_form());
    let mut f = Fields::new(form);

    let full_name = f.bounded_text("fullName", "Full name", MAX_NAME_LEN);
    let email = f.email();
    let phone = f.bounded_text("phone", "Phone number", MAX_PHONE_LEN);
    let city_state = f.optional_bounded_text("cityState", "City/state", MAX_CITY_STATE_LEN);
    let loan_type = f.one_of("loanType", "Loan type", LOAN_TYPES);
    let loan_amount = f.amount("loanAmount", "Loan amount");
    let tenure = f.optional_bounded_text("tenure", "Tenure", MAX_SHORT_TEXT_LEN);

    let consent = match form.get("consent") {
        None | Some(Value::Null) => defaults.consent.unwrap_or_else(|| {
            f.fail("consent", "Consent is required");
            false
        }),
        Some(v) => parse_bool(v).unwrap_or_else(|| {
            f.fail("consent", "Consent must be a boolean");
            false
        }),
    };

    let record = LoanRecord {
        id: Uuid::new_v4(),
        staging_doc_id: doc.id.clone(),
        user_id: approval.creator.submitter_user_id,
        full_name,
        email,
        phone,
        city_state,
        loan_type,
        loan_amount,
        tenure,
        consent,
        details: details(form, LOAN_CORE_KEYS),
        status: RecordStatus::Approved,
        admin_notes: approval.admin_notes.to_string(),
        approved_at: Some(approval.now),
        approved_by: Some(approval.approved_by.to_string()),
        created_by: approval.creator.kind,
        created_by_id: approval.creator.user_id,
        created_at: doc.created_at,
    };

    let preview = preview(
        form,
        &["fullName", "email", "phone", "loanType", "loanAmount", "consent"],
        Some(approval.creator),
    );
    f.finish(record, preview)
}

pub fn build_insurance(
    doc: &StagingDocument,
    approval: &Approval<'_>,
) -> Result<InsuranceRecord, ValidationReport> {
    let form = doc.form_object().unwrap_or_else(|| empty_form());
    let mut f = Fields::new(form);

    let full_name = f.bounded_text("fullName", "Full name", MAX_NAME_LEN);
    let email = f.email();
    let phone = f.bounded_text("phone", "Phone number", MAX_PHONE_LEN);
    let insurance_type = f.one_of("insuranceType", "Insurance type", INSURANCE_TYPES);

    let coverage_amount =
        f.optional_bounded_text("coverageAmount", "Coverage amount", MAX_SHORT_TEXT_LEN);

    let age = match form.get("age") {
        None => None,
        Some(v) => parse_age(v).unwrap_or_else(|_| {
            f.fail("age", "Age must be a whole number between 18 and 100");
            None
        }),
    };

    let record = InsuranceRecord {
        id: Uuid::new_v4(),
        staging_doc_id: doc.id.clone(),
        user_id: approval.creator.submitter_user_id,
        full_name,
        email,
        phone,
        age,
        insurance_type,
        coverage_amount,
        details: details(form, INSURANCE_CORE_KEYS),
        status: RecordStatus::Approved,
        admin_notes: approval.admin_notes.to_string(),
        approved_at: Some(approval.now),
        approved_by: Some(approval.approved_by.to_string()),
        created_by: approval.creator.kind,
        created_by_id: approval.creator.user_id,
        created_at: doc.created_at,
    };

    let preview = preview(
        form,
        &["fullName", "email", "phone", "insuranceType", "age"],
        Some(approval.creator),
    );
    f.finish(record, preview)
}

pub fn build_ticket(
    doc: &StagingDocument,
    submitter: Option<Uuid>,
    admin_notes: &str,
    priority: Option<&str>,
) -> Result<NewTicket, ValidationReport> {
    let form = doc.form_object().unwrap_or_else(|| empty_form());
    let mut f = Fields::new(form);

    let subject = f.bounded_text("subject", "Subject", MAX_SUBJECT_LEN);
    let description = f.text("description").or_else(|| f.text("message"));

    let loan_id = match f.text("loanId") {
        None => None,
        Some(raw) => Uuid::parse_str(&raw).map(Some).unwrap_or_else(|_| {
            f.fail("loanId", format!("`{raw}` is not a valid loan id"));
            None
        }),
    };

    let priority = match priority.map(str::trim).filter(|p| !p.is_empty()) {
        None => TicketPriority::default(),
        Some(p) => TicketPriority::parse(p).unwrap_or_else(|| {
            f.fail("priority", format!("`{p}` is not a valid priority"));
            TicketPriority::default()
        }),
    };

    let ticket = NewTicket {
        id: Uuid::new_v4(),
        staging_doc_id: doc.id.clone(),
        user_id: submitter,
        external_user_ref: doc.external_user_ref.clone(),
        loan_id,
        subject,
        description,
        priority,
        admin_notes: admin_notes.to_string(),
        created_at: doc.created_at,
    };

    let mut preview = preview(form, &["subject", "description", "loanId"], None);
    if let Value::Object(m) = &mut preview {
        m.insert("priority".into(), json!(priority));
    }
    f.finish(ticket, preview)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::record::CreatorKind;
    use crate::models::staging::{StagingStatus, SubmissionKind};

    fn doc(kind: SubmissionKind, form: Value) -> StagingDocument {
        let now = Utc::now();
        StagingDocument {
            id: "doc-1".into(),
            kind,
            external_user_ref: Some("u1".into()),
            form_data: form,
            status: StagingStatus::Pending,
            created_at: now,
            updated_at: now,
            migrated_at: None,
            record_id: None,
            rejection_reason: None,
            rejected_at: None,
            rejected_by: None,
        }
    }

    fn creator() -> Creator {
        Creator {
            user_id: Uuid::new_v4(),
            kind: CreatorKind::Admin,
            submitter_user_id: None,
        }
    }

    fn approval(c: &Creator) -> Approval<'_> {
        Approval {
            creator: c,
            approved_by: "admin-1",
            admin_notes: "",
            now: Utc::now(),
        }
    }

    #[test]
    fn test_loan_defaults_consent_and_keeps_details() {
        let d = doc(
            SubmissionKind::Loan,
            json!({
                "fullName": " A ",
                "email": "A@X.COM",
                "phone": 9876543210u64,
                "loanType": "Personal",
                "loanAmount": "5,00,000",
                "purpose": "wedding",
                "status": "Approved"
            }),
        );
        let c = creator();
        let loan = build_loan(&d, &approval(&c), FieldDefaults::default()).unwrap();
        assert_eq!(loan.full_name, "A");
        assert_eq!(loan.email, "a@x.com");
        assert_eq!(loan.phone, "9876543210");
        assert_eq!(loan.loan_amount, Decimal::from(500000));
        assert!(loan.consent);
        assert_eq!(loan.city_state, None);
        assert_eq!(loan.details, json!({"purpose": "wedding"}));
        assert_eq!(loan.status, RecordStatus::Approved);
        assert_eq!(loan.created_by_id, c.user_id);
        assert_eq!(loan.approved_by.as_deref(), Some("admin-1"));
    }

    #[test]
    fn test_loan_collects_all_field_errors() {
        let d = doc(
            SubmissionKind::Loan,
            json!({"email": "nope", "loanType": "Yacht", "loanAmount": -5}),
        );
        let c = creator();
        let report =
            build_loan(&d, &approval(&c), FieldDefaults { consent: None }).unwrap_err();
        let fields = report.fields();
        for f in ["fullName", "email", "phone", "loanType", "loanAmount", "consent"] {
            assert!(fields.contains(&f), "missing {f} in {fields:?}");
        }
        assert_eq!(report.preview["loanType"], "Yacht");
        assert_eq!(report.preview["createdBy"], "admin");
    }

    #[test]
    fn test_explicit_consent_false_is_kept() {
        let d = doc(
            SubmissionKind::Loan,
            json!({
                "fullName": "A", "email": "a@x.com", "phone": "1",
                "loanType": "Home", "loanAmount": 10, "consent": false
            }),
        );
        let c = creator();
        let loan = build_loan(&d, &approval(&c), FieldDefaults::default()).unwrap();
        assert!(!loan.consent);
    }

    #[test]
    fn test_insurance_age_bounds() {
        let base = json!({
            "fullName": "B", "email": "b@x.com", "phone": "1", "insuranceType": "Health Insurance"
        });
        let c = creator();

        let mut ok = base.clone();
        ok["age"] = json!("42");
        let rec = build_insurance(&doc(SubmissionKind::Insurance, ok), &approval(&c)).unwrap();
        assert_eq!(rec.age, Some(42));

        let mut young = base.clone();
        young["age"] = json!(17);
        let report =
            build_insurance(&doc(SubmissionKind::Insurance, young), &approval(&c)).unwrap_err();
        assert_eq!(report.fields(), vec!["age"]);
    }

    #[test]
    fn test_ticket_priority_and_loan_id() {
        let loan_id = Uuid::new_v4();
        let d = doc(
            SubmissionKind::Ticket,
            json!({"subject": "Help", "message": "call me", "loanId": loan_id.to_string()}),
        );
        let t = build_ticket(&d, None, "note", Some("HIGH")).unwrap();
        assert_eq!(t.priority, TicketPriority::High);
        assert_eq!(t.loan_id, Some(loan_id));
        assert_eq!(t.description.as_deref(), Some("call me"));
        assert_eq!(t.external_user_ref.as_deref(), Some("u1"));

        let t = build_ticket(&d, None, "", None).unwrap();
        assert_eq!(t.priority, TicketPriority::Medium);

        let bad = doc(SubmissionKind::Ticket, json!({"loanId": "abc"}));
        let report = build_ticket(&bad, None, "", Some("asap")).unwrap_err();
        assert_eq!(report.fields(), vec!["subject", "loanId", "priority"]);
    }

    #[test]
    fn test_values_beyond_column_limits_fail_validation() {
        let c = creator();
        let d = doc(
            SubmissionKind::Loan,
            json!({
                "fullName": "A", "email": "a@x.com", "phone": "9".repeat(40),
                "cityState": "x".repeat(201), "tenure": "t".repeat(65),
                "loanType": "Home", "loanAmount": 1e15
            }),
        );
        let report = build_loan(&d, &approval(&c), FieldDefaults::default()).unwrap_err();
        assert_eq!(report.fields(), vec!["phone", "cityState", "loanAmount", "tenure"]);
        assert_eq!(report.errors[0].message, "Phone number must be at most 32 characters");

        let d = doc(
            SubmissionKind::Loan,
            json!({
                "fullName": "A", "email": "a@x.com", "phone": "1",
                "loanType": "Home", "loanAmount": "1500.255"
            }),
        );
        let report = build_loan(&d, &approval(&c), FieldDefaults::default()).unwrap_err();
        assert_eq!(report.fields(), vec!["loanAmount"]);

        let d = doc(
            SubmissionKind::Loan,
            json!({
                "fullName": "A", "email": "a@x.com", "phone": "1",
                "loanType": "Home", "loanAmount": "99999999999999.99"
            }),
        );
        assert!(build_loan(&d, &approval(&c), FieldDefaults::default()).is_ok());

        let d = doc(
            SubmissionKind::Insurance,
            json!({
                "fullName": "B", "email": format!("{}@x.com", "b".repeat(320)),
                "phone": "1", "insuranceType": "Health Insurance",
                "coverageAmount": "9".repeat(65)
            }),
        );
        let report = build_insurance(&d, &approval(&c)).unwrap_err();
        assert_eq!(report.fields(), vec!["email", "coverageAmount"]);
    }

    #[test]
    fn test_parse_amount_variants() {
        assert_eq!(parse_amount(&json!(1500.5)), Some(Decimal::from_str("1500.5").unwrap()));
        assert_eq!(parse_amount(&json!("₹ 2,500")), Some(Decimal::from(2500)));
        assert_eq!(parse_amount(&json!("abc")), None);
        assert_eq!(parse_amount(&json!(true)), None);
    }
}

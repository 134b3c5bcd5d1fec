use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::LedgerError;

static STUDENT_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^0[0-9]{7}$").expect("valid student id pattern"));

pub const ID_LIST_FORMAT_ERROR: &str = "❌ Please ensure all IDs are 8 digits long, start with 0, and are separated by spaces for multiple IDs (ONLY FOR REGISTRATION AND LATE SIGN INS).";
pub const CHECKOUT_FORMAT_ERROR: &str = "❌ Please send the details in the correct format: User ID + Expected Return Date and Time + Reason.\n\nExample: 0XXXXXXX, 12/8 5:30 PM, Tuition ";
pub const CHECKOUT_SINGLE_ID_ERROR: &str = "❌ Please submit 1 ID at a time for early check out.";
pub const CHECKOUT_INVALID_ERROR: &str =
    "❌ Please ensure the User ID is valid and the Reason is not blank.";

/// An 8-digit student ID with a leading zero.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StudentId(String);

impl StudentId {
    pub fn parse(raw: &str) -> Option<Self> {
        STUDENT_ID.is_match(raw).then(|| Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StudentId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or(value)
    }
}

impl From<StudentId> for String {
    fn from(id: StudentId) -> Self {
        id.0
    }
}

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pad a masterlist ID cell to 8 digits; sheets drop leading zeros from numbers.
pub fn pad_id(raw: &str) -> String {
    format!("{:0>8}", raw.trim())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Registration,
    LateSignIn,
    EarlyCheckOut,
}

impl Action {
    pub const ALL: [Action; 3] = [
        Action::Registration,
        Action::LateSignIn,
        Action::EarlyCheckOut,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Registration => "registration",
            Action::LateSignIn => "late_sign_in",
            Action::EarlyCheckOut => "early_check_out",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.as_str() == s)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Action::Registration => "registration",
            Action::LateSignIn => "late sign in",
            Action::EarlyCheckOut => "early check out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutDetails {
    pub expected_return: String,
    pub reason: String,
}

/// One user message worth of IDs for a single action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionBatch {
    pub action: Action,
    pub ids: Vec<StudentId>,
    pub details: Option<CheckoutDetails>,
}

impl SubmissionBatch {
    pub fn new(action: Action, ids: Vec<StudentId>) -> Self {
        Self {
            action,
            ids,
            details: None,
        }
    }

    pub fn early_check_out(id: StudentId, details: CheckoutDetails) -> Self {
        Self {
            action: Action::EarlyCheckOut,
            ids: vec![id],
            details: Some(details),
        }
    }

    /// Parse a chat message for `action`.
    ///
    /// Registration and late sign-in take whitespace-separated IDs; early
    /// check-out takes `ID, expected return, reason`.
    pub fn parse(action: Action, text: &str) -> Result<Self, LedgerError> {
        match action {
            Action::EarlyCheckOut => parse_checkout(text),
            _ => {
                let ids = text
                    .split_whitespace()
                    .map(StudentId::parse)
                    .collect::<Option<Vec<_>>>()
                    .filter(|ids| !ids.is_empty())
                    .ok_or_else(|| LedgerError::InvalidFormat(ID_LIST_FORMAT_ERROR.into()))?;
                Ok(Self::new(action, ids))
            }
        }
    }

    /// Shape checks that must hold before the ledger is touched.
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.ids.is_empty() {
            return Err(LedgerError::InvalidFormat(ID_LIST_FORMAT_ERROR.into()));
        }
        match (self.action, &self.details) {
            (Action::EarlyCheckOut, _) if self.ids.len() != 1 => Err(
                LedgerError::InvalidFormat(CHECKOUT_SINGLE_ID_ERROR.into()),
            ),
            (Action::EarlyCheckOut, Some(d)) if !d.reason.trim().is_empty() => Ok(()),
            (Action::EarlyCheckOut, _) => {
                Err(LedgerError::InvalidFormat(CHECKOUT_INVALID_ERROR.into()))
            }
            (_, Some(_)) => Err(LedgerError::InvalidFormat(format!(
                "❌ Check-out details are only accepted for early check out, not {}.",
                self.action.label()
            ))),
            (_, None) => Ok(()),
        }
    }
}

fn parse_checkout(text: &str) -> Result<SubmissionBatch, LedgerError> {
    let parts: Vec<&str> = text.split(',').collect();
    let [id, expected_return, reason] = parts.as_slice() else {
        return Err(LedgerError::InvalidFormat(CHECKOUT_FORMAT_ERROR.into()));
    };
    let id = id.trim();
    if id.split_whitespace().count() != 1 {
        return Err(LedgerError::InvalidFormat(CHECKOUT_SINGLE_ID_ERROR.into()));
    }
    let reason = reason.trim();
    match StudentId::parse(id) {
        Some(id) if !reason.is_empty() => Ok(SubmissionBatch::early_check_out(
            id,
            CheckoutDetails {
                expected_return: expected_return.trim().to_string(),
                reason: reason.to_string(),
            },
        )),
        _ => Err(LedgerError::InvalidFormat(CHECKOUT_INVALID_ERROR.into())),
    }
}

/// Outcome of a successful batch, ready to be rendered for the submitter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub action: Action,
    pub entries: Vec<(StudentId, String)>,
}

impl Report {
    pub fn render(&self) -> String {
        match self.action {
            Action::Registration => format!(
                "✅ The following ID(s) and name(s) has / have been recorded successfully:\n\n{}",
                self.entries
                    .iter()
                    .map(|(id, name)| format!("{id} - {name}"))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            Action::LateSignIn => self.confirmations(
                "has successfully checked into camp.",
                "Go forth and seize the day, fellow adventurers!",
            ),
            Action::EarlyCheckOut => self.confirmations(
                "has successfully checked out of camp early.",
                "Please don't forget to ask your freshie to rest up!",
            ),
        }
    }

    fn confirmations(&self, line: &str, closing: &str) -> String {
        let lines = self
            .entries
            .iter()
            .map(|(id, name)| format!("✅ {id} {name} {line}\n"))
            .collect::<Vec<_>>()
            .join("\n");
        format!("{lines}\n{closing}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> StudentId {
        StudentId::parse(s).unwrap()
    }

    #[test]
    fn student_id_shape() {
        assert!(StudentId::parse("00012345").is_some());
        assert!(StudentId::parse("10012345").is_none());
        assert!(StudentId::parse("0001234").is_none());
        assert!(StudentId::parse("000123456").is_none());
        assert!(StudentId::parse("0001234a").is_none());
        assert_eq!(pad_id("12345"), "00012345");
        assert_eq!(pad_id(" 00012345 "), "00012345");
    }

    #[test]
    fn parse_id_lists() {
        let batch = SubmissionBatch::parse(Action::Registration, " 00012345  01234567\n").unwrap();
        assert_eq!(batch.ids, vec![id("00012345"), id("01234567")]);
        assert!(batch.details.is_none());

        let err = SubmissionBatch::parse(Action::LateSignIn, "00012345 1234").unwrap_err();
        assert!(matches!(err, LedgerError::InvalidFormat(ref m) if m == ID_LIST_FORMAT_ERROR));
        assert!(SubmissionBatch::parse(Action::Registration, "   ").is_err());
    }

    #[test]
    fn parse_checkout_details() {
        let batch =
            SubmissionBatch::parse(Action::EarlyCheckOut, "00012345, 12/8 5:30 PM, Tuition ")
                .unwrap();
        assert_eq!(batch.ids, vec![id("00012345")]);
        assert_eq!(
            batch.details,
            Some(CheckoutDetails {
                expected_return: "12/8 5:30 PM".into(),
                reason: "Tuition".into(),
            })
        );
    }

    #[test]
    fn parse_checkout_rejections() {
        let msg = |text: &str| match SubmissionBatch::parse(Action::EarlyCheckOut, text) {
            Err(LedgerError::InvalidFormat(m)) => m,
            other => panic!("unexpected {other:?}"),
        };
        assert_eq!(msg("00012345, tomorrow"), CHECKOUT_FORMAT_ERROR);
        assert_eq!(msg("00012345 00054321, tomorrow, sick"), CHECKOUT_SINGLE_ID_ERROR);
        assert_eq!(msg("00012345, tomorrow,  "), CHECKOUT_INVALID_ERROR);
        assert_eq!(msg("12345678, tomorrow, sick"), CHECKOUT_INVALID_ERROR);
    }

    #[test]
    fn validate_checks_checkout_shape() {
        let details = CheckoutDetails {
            expected_return: "Not coming back".into(),
            reason: "Tuition".into(),
        };
        let ok = SubmissionBatch::early_check_out(id("00012345"), details.clone());
        ok.validate().unwrap();

        let mut two = ok.clone();
        two.ids.push(id("00054321"));
        assert!(matches!(two.validate(), Err(LedgerError::InvalidFormat(_))));

        let mut blank = ok.clone();
        blank.details = Some(CheckoutDetails {
            reason: " ".into(),
            ..details.clone()
        });
        assert!(blank.validate().is_err());

        let mut missing = ok;
        missing.details = None;
        assert!(missing.validate().is_err());

        let mut stray = SubmissionBatch::new(Action::Registration, vec![id("00012345")]);
        stray.details = Some(details);
        assert!(stray.validate().is_err());

        assert!(SubmissionBatch::new(Action::LateSignIn, vec![]).validate().is_err());
    }

    #[test]
    fn action_names_round_trip() {
        for action in Action::ALL {
            assert_eq!(Action::from_name(action.as_str()), Some(action));
        }
        assert_eq!(Action::from_name("get_points"), None);
    }

    #[test]
    fn render_reports() {
        let registration = Report {
            action: Action::Registration,
            entries: vec![(id("00012345"), "Alice Tan".into())],
        };
        assert_eq!(
            registration.render(),
            "✅ The following ID(s) and name(s) has / have been recorded successfully:\n\n00012345 - Alice Tan"
        );

        let late = Report {
            action: Action::LateSignIn,
            entries: vec![
                (id("00012345"), "Alice Tan".into()),
                (id("00054321"), "Bob Lim".into()),
            ],
        };
        assert_eq!(
            late.render(),
            "✅ 00012345 Alice Tan has successfully checked into camp.\n\n\
             ✅ 00054321 Bob Lim has successfully checked into camp.\n\n\
             Go forth and seize the day, fellow adventurers!"
        );
    }
}

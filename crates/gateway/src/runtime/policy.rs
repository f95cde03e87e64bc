//! Execute policy enforcement.
//!
//! `open` passes everything through; `confirm` requires a valid
//! confirmation token; `strict` adds an amount ceiling on top. The ceiling
//! is checked before the token is consumed, so a request rejected for its
//! amount leaves the token usable for a corrected retry.

use serde_json::Value;

use agenr_domain::config::ExecutePolicy;
use agenr_domain::error::{Error, Result};
use agenr_store::Store;

use super::confirmation;

/// Amount extracted from `request.amount_cents`, falling back to
/// `request.amount`. Integer cents.
fn request_amount_cents(request: &Value) -> Option<i64> {
    request
        .get("amount_cents")
        .or_else(|| request.get("amount"))
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.round() as i64)))
}

/// Gate one execute operation. `confirmation_token` is the value of the
/// `x-confirmation-token` header when the client sent one.
pub fn enforce(
    policy: ExecutePolicy,
    max_amount_cents: i64,
    store: &Store,
    business_id: &str,
    request: &Value,
    confirmation_token: Option<&str>,
) -> Result<()> {
    match policy {
        ExecutePolicy::Open => Ok(()),
        ExecutePolicy::Confirm => {
            require_confirmation(store, business_id, request, confirmation_token)
        }
        ExecutePolicy::Strict => {
            if let Some(amount) = request_amount_cents(request) {
                if amount > max_amount_cents {
                    return Err(Error::Forbidden(format!(
                        "amount {amount} exceeds the configured ceiling of {max_amount_cents} cents"
                    )));
                }
            }
            require_confirmation(store, business_id, request, confirmation_token)
        }
    }
}

fn require_confirmation(
    store: &Store,
    business_id: &str,
    request: &Value,
    confirmation_token: Option<&str>,
) -> Result<()> {
    let token = confirmation_token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::Forbidden("Missing confirmation token".into()))?;
    confirmation::validate_and_consume(store, token, business_id, request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn open_policy_passes_everything() {
        let store = Store::open_in_memory().unwrap();
        enforce(
            ExecutePolicy::Open,
            100,
            &store,
            "stripe",
            &json!({"amount_cents": 99_999}),
            None,
        )
        .unwrap();
    }

    #[test]
    fn confirm_policy_requires_a_token() {
        let store = Store::open_in_memory().unwrap();
        let request = json!({"amount_cents": 50});

        let err = enforce(ExecutePolicy::Confirm, 100, &store, "stripe", &request, None)
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));

        let prepared = confirmation::prepare(&store, "stripe", &request).unwrap();
        enforce(
            ExecutePolicy::Confirm,
            100,
            &store,
            "stripe",
            &request,
            Some(&prepared.confirmation_token),
        )
        .unwrap();
    }

    #[test]
    fn strict_policy_enforces_the_ceiling() {
        let store = Store::open_in_memory().unwrap();
        let request = json!({"amount_cents": 250});
        let prepared = confirmation::prepare(&store, "stripe", &request).unwrap();

        let err = enforce(
            ExecutePolicy::Strict,
            100,
            &store,
            "stripe",
            &request,
            Some(&prepared.confirmation_token),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ceiling"));

        // The ceiling rejected the request before the token was consumed.
        let small = json!({"amount_cents": 99});
        let prepared_small = confirmation::prepare(&store, "stripe", &small).unwrap();
        enforce(
            ExecutePolicy::Strict,
            100,
            &store,
            "stripe",
            &small,
            Some(&prepared_small.confirmation_token),
        )
        .unwrap();
    }

    #[test]
    fn strict_falls_back_to_amount_field() {
        let store = Store::open_in_memory().unwrap();
        let request = json!({"amount": 5000});
        let prepared = confirmation::prepare(&store, "stripe", &request).unwrap();
        let err = enforce(
            ExecutePolicy::Strict,
            100,
            &store,
            "stripe",
            &request,
            Some(&prepared.confirmation_token),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Forbidden(_)));
    }

    #[test]
    fn strict_without_amount_still_needs_confirmation() {
        let store = Store::open_in_memory().unwrap();
        let request = json!({"action": "sync"});
        let prepared = confirmation::prepare(&store, "stripe", &request).unwrap();
        enforce(
            ExecutePolicy::Strict,
            100,
            &store,
            "stripe",
            &request,
            Some(&prepared.confirmation_token),
        )
        .unwrap();
    }
}

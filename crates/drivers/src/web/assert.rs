//! Web assertion evaluation

use std::time::Duration;

use waypoint_common::{ActionOutcome, Assertion, AssertionKind, Error, Result, Target};

use crate::web::page::{PageLocator, PageSession};
use crate::web::resolve_on_page;

/// Outcome so far, plus the failure if there was one.
type Checked = std::result::Result<ActionOutcome, (ActionOutcome, Error)>;

/// Check assertions in order, stopping at the first failure. Match attempts
/// of every assertion checked so far are concatenated.
pub(crate) async fn check_all(page: &dyn PageSession, assertions: &[Assertion]) -> Checked {
    let mut gathered = ActionOutcome::default();
    for assertion in assertions {
        match check_single(page, assertion).await {
            Ok(outcome) => gathered = gathered.merge(outcome),
            Err((outcome, e)) => return Err((gathered.merge(outcome), e)),
        }
    }
    Ok(gathered)
}

/// `not` is unwrapped iteratively: an odd number of negations inverts the
/// innermost result. Transport and validation failures are never inverted.
async fn check_single(page: &dyn PageSession, assertion: &Assertion) -> Checked {
    let mut negations = 0usize;
    let mut current = assertion;
    while current.kind == AssertionKind::Not {
        current = match current.assert.as_deref() {
            Some(inner) => inner,
            None => return Err((ActionOutcome::default(), requires(AssertionKind::Not, "nested assert"))),
        };
        negations += 1;
    }

    let result = check_positive(page, current).await;
    if negations % 2 == 0 {
        return result;
    }
    match result {
        Ok(_) => Err((
            ActionOutcome::default(),
            failed(AssertionKind::Not, "Negated assertion matched"),
        )),
        Err((outcome, e)) if e.is_transport() => Err((outcome, e)),
        Err((outcome, e @ (Error::InvalidWorkflow(_) | Error::UnsupportedAction { .. }))) => Err((outcome, e)),
        Err((outcome, e)) => Ok(outcome.merge(ActionOutcome::with_attempts(e.match_attempts().to_vec()))),
    }
}

fn failed(kind: AssertionKind, message: &str) -> Error {
    Error::AssertionFailed {
        kind: kind.to_string(),
        message: message.to_string(),
    }
}

fn requires(kind: AssertionKind, what: &str) -> Error {
    Error::InvalidWorkflow(format!("{} assertion requires {}", kind, what))
}

fn expected<'a>(field: &'a Option<String>, kind: AssertionKind, what: &str) -> Result<&'a str> {
    field.as_deref().ok_or_else(|| requires(kind, what))
}

fn target_of(assertion: &Assertion) -> Result<&Target> {
    assertion
        .target
        .as_ref()
        .ok_or_else(|| requires(assertion.kind, "a target"))
}

async fn check_positive(page: &dyn PageSession, assertion: &Assertion) -> Checked {
    let kind = assertion.kind;
    match kind {
        AssertionKind::WebExists
        | AssertionKind::WebVisible
        | AssertionKind::WebTextEquals
        | AssertionKind::WebTextContains
        | AssertionKind::WebValueEquals
        | AssertionKind::WebValueContains => check_element(page, assertion).await,
        _ => check_page(page, assertion)
            .await
            .map(|_| ActionOutcome::default())
            .map_err(|e| (ActionOutcome::default(), e)),
    }
}

/// Assertions about one resolved element. Attempts from the resolution are
/// kept even when the check after it fails.
async fn check_element(page: &dyn PageSession, assertion: &Assertion) -> Checked {
    let kind = assertion.kind;
    let timeout = assertion.timeout_ms.map(Duration::from_millis);
    let target = target_of(assertion).map_err(|e| (ActionOutcome::default(), e))?;
    let (locator, resolution) = resolve_on_page(page, target, timeout)
        .await
        .map_err(|e| (ActionOutcome::default(), e))?;
    let outcome = resolution.into_outcome();

    match compare_element(page, assertion, &locator, timeout).await {
        Ok(()) => Ok(outcome),
        Err(e) => {
            tracing::debug!("{} failed: {}", kind, e);
            Err((outcome, e))
        }
    }
}

async fn compare_element(
    page: &dyn PageSession,
    assertion: &Assertion,
    locator: &PageLocator,
    timeout: Option<Duration>,
) -> Result<()> {
    let kind = assertion.kind;
    match kind {
        AssertionKind::WebExists => Ok(()),
        AssertionKind::WebVisible => {
            if !page.is_visible(locator).await? {
                return Err(failed(kind, "Target is not visible"));
            }
            Ok(())
        }
        AssertionKind::WebTextEquals => {
            let expected = expected(&assertion.text, kind, "target + text")?;
            if page.text_content(locator, timeout).await? != expected {
                return Err(failed(kind, "Text does not equal expected value"));
            }
            Ok(())
        }
        AssertionKind::WebTextContains => {
            let expected = expected(&assertion.text, kind, "target + text")?;
            if !page.text_content(locator, timeout).await?.contains(expected) {
                return Err(failed(kind, "Text does not contain expected value"));
            }
            Ok(())
        }
        AssertionKind::WebValueEquals => {
            let expected = expected(&assertion.value, kind, "target + value")?;
            if page.input_value(locator, timeout).await? != expected {
                return Err(failed(kind, "Value does not equal expected value"));
            }
            Ok(())
        }
        AssertionKind::WebValueContains => {
            let expected = expected(&assertion.value, kind, "target + value")?;
            if !page.input_value(locator, timeout).await?.contains(expected) {
                return Err(failed(kind, "Value does not contain expected value"));
            }
            Ok(())
        }
        _ => Err(unsupported(kind)),
    }
}

/// Assertions about the page itself; no resolution involved.
async fn check_page(page: &dyn PageSession, assertion: &Assertion) -> Result<()> {
    let kind = assertion.kind;
    match kind {
        AssertionKind::WebUrlEquals => {
            let expected = expected(&assertion.url_equals, kind, "url_equals")?;
            if page.url().await? != expected {
                return Err(failed(kind, "URL does not equal expected value"));
            }
        }
        AssertionKind::WebUrlContains => {
            let expected = expected(&assertion.url_contains, kind, "url_contains")?;
            if !page.url().await?.contains(expected) {
                return Err(failed(kind, "URL does not contain expected value"));
            }
        }
        AssertionKind::WebTitleEquals => {
            let expected = expected(&assertion.title_equals, kind, "title_equals")?;
            if page.title().await? != expected {
                return Err(failed(kind, "Title does not equal expected value"));
            }
        }
        AssertionKind::WebTitleContains => {
            let expected = expected(&assertion.title_contains, kind, "title_contains")?;
            if !page.title().await?.contains(expected) {
                return Err(failed(kind, "Title does not contain expected value"));
            }
        }
        _ => return Err(unsupported(kind)),
    }
    Ok(())
}

fn unsupported(kind: AssertionKind) -> Error {
    Error::UnsupportedAction {
        driver: "web".to_string(),
        action: kind.to_string(),
    }
}

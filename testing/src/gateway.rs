//! Scripted payment gateway
//!
//! Records every session request and answers according to its mode.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use boxoffice_core::{
    CheckoutSession, CheckoutSessionRequest, GatewayError, GatewayResult, PaymentGateway,
};

#[derive(Clone, Debug)]
enum Mode {
    Succeed,
    Fail(GatewayError),
    Hang,
}

/// Mock payment gateway
///
/// # Example
///
/// ```
/// use boxoffice_testing::MockPaymentGateway;
///
/// let gateway = MockPaymentGateway::new();
/// assert!(gateway.requests().is_empty());
/// ```
#[derive(Clone, Debug)]
pub struct MockPaymentGateway {
    mode: Mode,
    requests: Arc<Mutex<Vec<CheckoutSessionRequest>>>,
    sessions: Arc<AtomicUsize>,
}

impl MockPaymentGateway {
    /// A gateway that opens every session
    #[must_use]
    pub fn new() -> Self {
        Self::with_mode(Mode::Succeed)
    }

    /// A gateway that answers every request with `error`
    #[must_use]
    pub fn failing(error: GatewayError) -> Self {
        Self::with_mode(Mode::Fail(error))
    }

    /// A gateway that never answers
    #[must_use]
    pub fn hanging() -> Self {
        Self::with_mode(Mode::Hang)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            requests: Arc::new(Mutex::new(Vec::new())),
            sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Requests received so far, oldest first
    #[must_use]
    pub fn requests(&self) -> Vec<CheckoutSessionRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// The most recent request
    #[must_use]
    pub fn last_request(&self) -> Option<CheckoutSessionRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockPaymentGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl PaymentGateway for MockPaymentGateway {
    fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Pin<Box<dyn Future<Output = GatewayResult<CheckoutSession>> + Send>> {
        self.requests.lock().unwrap().push(request);
        let mode = self.mode.clone();
        let number = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;

        Box::pin(async move {
            match mode {
                Mode::Succeed => {
                    let session_id = format!("cs_mock_{number}");
                    Ok(CheckoutSession {
                        url: Some(format!("https://checkout.example.com/pay/{session_id}")),
                        session_id,
                    })
                }
                Mode::Fail(error) => Err(error),
                Mode::Hang => std::future::pending().await,
            }
        })
    }
}

//! Simulated API call
//!
//! A fake backend answers a user lookup after a simulated network latency.
//! With probability `failure_rate` it answers with a 404 error record instead.
//! [`make_api_call`] wraps the lookup in a deferred value settled from a timer,
//! and [`profile_chain`] walks the result through a chain of handlers ending
//! in a `catch`.

use crate::deferred::Deferred;
use crate::event_loop::EventLoop;
use crate::runtime::Value;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::rc::Rc;

/// Simulated network latency in milliseconds of virtual time
pub const DEFAULT_LATENCY_MS: u64 = 1000;

/// Probability that a lookup fails
pub const DEFAULT_FAILURE_RATE: f64 = 0.5;

/// The user record served by the fake backend
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub username: String,
    pub favorite_number: u32,
    pub profile: String,
}

impl User {
    pub fn sample() -> Self {
        Self {
            username: "UlyssesCode".to_string(),
            favorite_number: 3,
            profile: "https://github.com/UlyssesCode".to_string(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::record([
            ("username", Value::from(self.username.as_str())),
            ("favoriteNumber", Value::from(self.favorite_number)),
            ("profile", Value::from(self.profile.as_str())),
        ])
    }
}

/// What the fake backend answers
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Success {
        status_code: u16,
        data: User,
    },
    Failure {
        status_code: u16,
        message: String,
        error: String,
    },
}

impl ApiResponse {
    pub fn status_code(&self) -> u16 {
        match self {
            ApiResponse::Success { status_code, .. } | ApiResponse::Failure { status_code, .. } => {
                *status_code
            }
        }
    }

    /// The payload of a successful response; undefined for failures
    pub fn data(&self) -> Value {
        match self {
            ApiResponse::Success { data, .. } => data.to_value(),
            ApiResponse::Failure { .. } => Value::Undefined,
        }
    }

    /// The whole response as a record
    pub fn to_value(&self) -> Value {
        match self {
            ApiResponse::Success { status_code, data } => Value::record([
                ("data", data.to_value()),
                ("statusCode", Value::from(*status_code as u32)),
            ]),
            ApiResponse::Failure {
                status_code,
                message,
                error,
            } => Value::record([
                ("statusCode", Value::from(*status_code as u32)),
                ("message", Value::from(message.as_str())),
                ("error", Value::from(error.as_str())),
            ]),
        }
    }
}

/// A backend that randomly fails
pub struct FakeBackend {
    rng: StdRng,
    failure_rate: f64,
    calls: u64,
}

impl FakeBackend {
    pub fn new(failure_rate: f64) -> Self {
        Self::with_rng(StdRng::from_entropy(), failure_rate)
    }

    /// A backend whose answers are reproducible for a given seed
    pub fn seeded(seed: u64, failure_rate: f64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed), failure_rate)
    }

    fn with_rng(rng: StdRng, failure_rate: f64) -> Self {
        Self {
            rng,
            failure_rate: failure_rate.clamp(0.0, 1.0),
            calls: 0,
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn fetch_user(&mut self) -> ApiResponse {
        self.calls += 1;
        if self.rng.gen::<f64>() >= self.failure_rate {
            ApiResponse::Success {
                status_code: 200,
                data: User::sample(),
            }
        } else {
            ApiResponse::Failure {
                status_code: 404,
                message: "User not found".to_string(),
                error: "Not Found".to_string(),
            }
        }
    }
}

/// A user lookup that settles after `latency_ms` of virtual time.
///
/// Fulfills with the user record, or rejects with the error record when the
/// status code is 400 or above.
pub fn make_api_call(
    event_loop: &EventLoop,
    backend: Rc<RefCell<FakeBackend>>,
    latency_ms: u64,
) -> Deferred {
    let timers = event_loop.clone();
    Deferred::new(event_loop, move |resolver| {
        timers.set_timeout(latency_ms, move || {
            let response = backend.borrow_mut().fetch_user();
            tracing::debug!(status = response.status_code(), "fake backend answered");
            if response.status_code() >= 400 {
                resolver.reject(response.to_value());
            } else {
                resolver.resolve(response.data());
            }
        });
        Ok(())
    })
}

/// Lines printed by the handler chain, in order
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    lines: Rc<RefCell<Vec<String>>>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, line: impl Into<String>) {
        let line = line.into();
        tracing::info!("{}", line);
        self.lines.borrow_mut().push(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }
}

/// Five value handlers followed by a single `catch`.
///
/// A failed lookup skips every value handler and reaches the `catch` with
/// the original error record.
pub fn profile_chain(call: &Deferred, transcript: &Transcript) -> Deferred {
    let (t1, t2, t3, t4, t5, t6) = (
        transcript.clone(),
        transcript.clone(),
        transcript.clone(),
        transcript.clone(),
        transcript.clone(),
        transcript.clone(),
    );

    call.and_then(move |user| {
        t1.log("In the first .then()");
        Ok(user)
    })
    .and_then(move |user| {
        t2.log(format!(
            "User {}'s favorite number is {}",
            user.get("username")?,
            user.get("favoriteNumber")?
        ));
        Ok(user)
    })
    .and_then(move |user| {
        t3.log("The previous .then() told you the favoriteNumber");
        user.get("profile")
    })
    .and_then(move |profile| {
        t4.log(format!("The profile URL is {}", profile));
        Ok(Value::Undefined)
    })
    .and_then(move |_| {
        t5.log("This is the last then()");
        Ok(Value::Undefined)
    })
    .catch(move |error| {
        t6.log(error.get("message")?.to_string());
        Ok(Value::Undefined)
    })
}

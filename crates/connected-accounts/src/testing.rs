//! Test doubles shared by the unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::common::{HttpClient, HttpRequest, HttpResponse, TransportError};

/// Records every request and answers from a queue of canned responses.
///
/// Running out of canned responses is a transport failure, which makes an
/// unexpected extra call visible in the test outcome as well as in `calls()`.
#[derive(Default)]
pub struct FakeHttp {
    responses: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeHttp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(self, response: Result<HttpResponse, TransportError>) -> Self {
        self.responses.lock().unwrap().push_back(response);
        self
    }

    pub fn respond(self, status: u16, body: &str) -> Self {
        self.push(Ok(HttpResponse::new(status, body)))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Err(TransportError::Request(message.to_string())))
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpClient for FakeHttp {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request("no canned response".to_string())))
    }
}

//! Interaction protocol spoken by a running mock service
//!
//! - `POST   {base}/interactions`              register one interaction
//! - `DELETE {base}/interactions`              clear all interactions
//! - `GET    {base}/interactions/verification` check every interaction was exercised
//! - `GET    {base}`                           liveness
//!
//! Every request carries `X-Pact-Mock-Service: true`.

mod client;

pub use client::{InteractionClient, MOCK_SERVICE_HEADER};

//! The Bayeux session layer and its HTTP transport.

pub mod channel;
pub mod config;
pub mod connector;
pub mod dispatch;
pub mod http;
pub mod session;

pub use channel::{channel_from_node_name, is_meta_channel, node_name_from_channel};
pub use config::BayeuxConfig;
pub use connector::{Connector, RandomIdGenerator, SessionIdGenerator};
pub use dispatch::{dispatch_messages, DispatchResult, ParkedConnect};
pub use http::{bayeux_service, complete_poll, parse_form_messages, parse_json_messages};
pub use session::{PollListener, Session};

pub mod invite;
pub mod live_session;
pub mod participant;
pub mod requests;
pub mod responses;

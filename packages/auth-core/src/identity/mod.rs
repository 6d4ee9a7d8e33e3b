mod http;

pub use http::HttpIdentityStore;

// @generated
// This file is @generated by prost-build.
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct SubscribeRequest {
    /// Ticker symbol, 3-10 alphanumeric characters. Case-insensitive.
    #[prost(string, tag = "1")]
    pub ticker: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PriceUpdate {
    #[prost(string, tag = "1")]
    pub ticker: ::prost::alloc::string::String,
    #[prost(double, tag = "2")]
    pub price: f64,
    #[prost(message, optional, tag = "3")]
    pub observed_at: ::core::option::Option<::prost_types::Timestamp>,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RemoveTickerRequest {
    #[prost(string, tag = "1")]
    pub ticker: ::prost::alloc::string::String,
}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct RemoveTickerResponse {
    #[prost(bool, tag = "1")]
    pub success: bool,
    #[prost(string, tag = "2")]
    pub message: ::prost::alloc::string::String,
}
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct ListActiveTickersRequest {}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct ListActiveTickersResponse {
    /// Sorted ticker symbols.
    #[prost(string, repeated, tag = "1")]
    pub tickers: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}
#[derive(Clone, Copy, PartialEq, Eq, Hash, ::prost::Message)]
pub struct GetServiceStatusRequest {}
#[derive(Clone, PartialEq, Eq, Hash, ::prost::Message)]
pub struct GetServiceStatusResponse {
    #[prost(string, tag = "1")]
    pub version: ::prost::alloc::string::String,
    #[prost(message, optional, tag = "2")]
    pub started_at: ::core::option::Option<::prost_types::Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub current_time: ::core::option::Option<::prost_types::Timestamp>,
    #[prost(uint32, tag = "4")]
    pub active_sessions: u32,
    #[prost(uint32, tag = "5")]
    pub active_tickers: u32,
    #[prost(uint32, tag = "6")]
    pub subscribers: u32,
    #[prost(uint64, tag = "7")]
    pub pollers_started: u64,
    #[prost(uint32, tag = "8")]
    pub pollers_running: u32,
    #[prost(bool, tag = "9")]
    pub source_ready: bool,
}
include!("pluto.price.v1.tonic.rs");
// @@protoc_insertion_point(module)

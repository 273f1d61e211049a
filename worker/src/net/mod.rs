mod client;

pub use client::MergeClient;

pub mod http_client;
pub mod record_store;
pub mod report_output_adapter;
pub mod sqlite_store;

/// End-to-end probe tests
pub mod plain_tests;
pub mod tls_tests;

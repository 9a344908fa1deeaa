pub mod echo_parser;
pub mod range_data_parser;

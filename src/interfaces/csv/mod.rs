pub mod offer_reader;
pub mod report_writer;

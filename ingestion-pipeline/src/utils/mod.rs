pub mod pdf_conversion;
pub mod tabular;

pub mod mapping;
pub mod odm;
pub mod records;
pub mod soap;
pub mod sparql;
pub mod transliterate;

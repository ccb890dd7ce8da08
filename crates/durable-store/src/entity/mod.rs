//! Sea-ORM entities for the durable side of the flash-sale core

pub mod order;
pub mod product;
pub mod promotion;

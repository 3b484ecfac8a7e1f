mod catalog;
mod selector;

pub use catalog::{Keyword, UseCase, UseCaseCatalog, UseCaseSpec};
pub use selector::{ProviderRecommendations, ProviderSelector, UseCaseMatch, MIN_CONFIDENCE};

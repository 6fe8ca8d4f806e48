mod country_provider;
mod provider_factory;

pub use country_provider::CountryProvider;
pub use provider_factory::ProviderFactory;

mod default_provider_factory;
mod maxmind_country_provider;
mod web_service_country_provider;

pub use default_provider_factory::DefaultProviderFactory;
pub use maxmind_country_provider::MaxMindCountryProvider;
pub use web_service_country_provider::WebServiceCountryProvider;

mod common;
mod result_rules;
mod routing;
mod symptoms;

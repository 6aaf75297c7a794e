pub mod builders;
pub mod rules;

pub use builders::RulesBuilder;
pub use rules::TestRules;

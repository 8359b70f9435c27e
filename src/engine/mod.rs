pub mod choices;
pub mod controller;
pub mod debounce;
pub mod panel_locator;
pub mod survey_model;
pub mod template;
pub mod validation;

mod common;
mod model_selection;
mod session;

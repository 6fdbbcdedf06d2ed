// Route handlers, one module per resource.

pub mod items;
pub mod results;
pub mod run;
pub mod status;

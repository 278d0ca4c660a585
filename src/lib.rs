pub mod class;
pub mod consts;
pub mod descriptor;
pub mod runtime;

#[cfg(test)]
mod test_support;

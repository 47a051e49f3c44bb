pub(crate) mod support;

mod scenarios;

// Desktop platform implementations

pub mod screen;

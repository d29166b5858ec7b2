pub mod circle_tracker;
pub mod history;
pub mod least_squares;
pub mod line_tracker;
pub mod path_matcher;
pub mod path_reference;
pub mod projection;
pub mod shape_tracker;
pub mod timed_sample;

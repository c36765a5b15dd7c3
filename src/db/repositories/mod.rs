mod first_crack;
mod readings;
mod sessions;

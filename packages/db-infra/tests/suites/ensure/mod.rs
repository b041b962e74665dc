mod race;
mod sqlite_file;

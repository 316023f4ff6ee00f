pub mod cheat_table;

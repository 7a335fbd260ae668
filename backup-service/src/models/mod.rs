pub mod backup_record;

pub mod expense_batch;

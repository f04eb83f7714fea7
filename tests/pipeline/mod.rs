mod mock_pipeline;
mod runner;

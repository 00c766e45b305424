pub mod face_localizer;
